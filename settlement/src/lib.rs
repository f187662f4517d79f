//! Settlement Engine
//!
//! Non-custodial recurring-payment authorization and settlement.
//!
//! # Architecture
//!
//! A payer signs a typed `CreateAuthorization` once. The operator then pulls
//! bounded amounts on schedule from a reservation held by an allocation unit,
//! splits each payment between operator, organization and merchant, and
//! recovers its network fee in the payer's asset.
//!
//! - **SubscriptionRegistry**: the authorization state machine
//! - **FeeCalculator**: fee split arithmetic with a 0.75% floor
//! - **GasReimbursementMeter**: operator fee recovery, capped by the
//!   authorization's ceiling
//! - **SettlementExecutor**: atomic, single-writer entry points
//! - **ExecutorHandle**: optional tokio actor queueing calls from async code
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Config, OwnerConfig, SettlementExecutor, SystemClock};
//! use reservation_ledger::{Address, MemoryAssetBook};
//! use std::sync::Arc;
//!
//! fn main() -> settlement::Result<()> {
//!     let owner = Address::from_bytes([1; 20]);
//!     let cosigner = Address::from_bytes([2; 20]);
//!     let executor = SettlementExecutor::new(
//!         Config::default(),
//!         Address::from_bytes([0xFA; 20]),
//!         OwnerConfig::new(owner, cosigner)?,
//!         MemoryAssetBook::new(1),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let unit = executor.create_allocation_unit(&owner)?.output;
//!     println!("unit {} approves as {}", unit, executor.unit_address(unit)?);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod fees;
pub mod clock;
pub mod config;
pub mod gas;
pub mod events;
pub mod admin;
pub mod subscription;
pub mod metrics;
pub mod executor;
pub mod actor;

// Re-exports
pub use actor::{spawn_settlement_actor, ExecutorHandle};
pub use admin::OwnerConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use events::SettlementEvent;
pub use executor::{Receipt, SettlementExecutor};
pub use fees::{FeeCalculator, FeeSplit, OrganizationFee};
pub use gas::{GasReimbursementMeter, GasReport, GasSchedule, Reimbursement, ReimbursementMode};
pub use subscription::{Created, Executed, SubscriptionRegistry};
pub use types::*;
