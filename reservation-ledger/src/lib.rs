//! DelTran Reservation Ledger
//!
//! Non-custodial reservation bookkeeping for recurring pulls.
//!
//! # Architecture
//!
//! - **Allocation units**: spender identities holding at most one reservation
//!   slot per (payer, asset) pair, so concurrent authorizations never share an
//!   allowance
//! - **Registry**: factory/arena for units plus the (payer, id) → unit table
//! - **Typed signatures**: domain-separated digests over authorization messages
//! - **Assets**: consumed through the `AssetBook` trait, never implemented here
//!
//! # Invariants
//!
//! - `used_amount <= amount` for every slot, always
//! - At most one slot per (payer, asset) per unit
//! - Unit ids are sequential from 1; 0 is the uninitialized sentinel
//! - A unit's owning factory is fixed at construction

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod asset;
pub mod crypto;
pub mod error;
pub mod unit;
pub mod registry;

// Re-exports
pub use asset::{AssetBook, AssetError, MemoryAssetBook};
pub use crypto::{Domain, KeyPair, SignatureAuthority, TypedMessage};
pub use error::{Error, Result};
pub use registry::ReservationRegistry;
pub use types::{
    Address, Amount, AssetId, DelegatedProof, ReservationProof, ReservationSlot, StreamRecord,
    UnitId,
};
pub use unit::AllocationUnit;
