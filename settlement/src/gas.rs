//! Gas metering and reimbursement
//!
//! The operator pays network fees in the native currency and recovers them in
//! the payer's asset. Off-ledger, gas is modeled by a `GasMeter` charging a
//! `GasSchedule` for every storage access, signature check, asset transfer and
//! event.
//!
//! # Wrapping discipline
//!
//! ```text
//! measured  = gas charged by the wrapped operation
//! to_refund = measured + base_overhead + calibration[entry]
//! amount    = to_refund * gas_price * token_price_in_wei / 1e18
//! ```
//!
//! `base_overhead` covers the intrinsic cost charged before the window opens,
//! the calibration constant covers the reimbursement bookkeeping that runs
//! after it closes.

use crate::subscription::SubscriptionRegistry;
use crate::types::{EntryPoint, GasPricing};
use crate::config::GasConfig;
use crate::{Error, Result};
use reservation_ledger::{Address, Amount, AssetBook, AssetId};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 1e18, the fixed-point scale of `token_price_in_wei`
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Metered operation classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasOp {
    /// Charged once per call before measurement starts
    Intrinsic,
    /// Read a stored record
    StorageRead,
    /// Create a stored record
    StorageCreate,
    /// Update a stored record
    StorageWrite,
    /// Delete a stored record
    StorageClear,
    /// Recover a typed-data signer
    SignatureCheck,
    /// Move funds on an asset
    AssetTransfer,
    /// Apply a delegated-transfer proof
    AssetPermit,
    /// Emit an event
    EventLog,
}

/// Cost of each operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Intrinsic call cost
    pub intrinsic: u64,
    /// Storage read
    pub storage_read: u64,
    /// Storage create
    pub storage_create: u64,
    /// Storage write
    pub storage_write: u64,
    /// Storage clear
    pub storage_clear: u64,
    /// Signature recovery
    pub signature_check: u64,
    /// Asset transfer
    pub asset_transfer: u64,
    /// Delegated proof application
    pub asset_permit: u64,
    /// Event emission
    pub event_log: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            intrinsic: 21_000,
            storage_read: 2_100,
            storage_create: 20_000,
            storage_write: 5_000,
            storage_clear: 5_000,
            signature_check: 6_000,
            asset_transfer: 35_000,
            asset_permit: 50_000,
            event_log: 1_500,
        }
    }
}

impl GasSchedule {
    /// Cost of one operation
    pub fn cost(&self, op: GasOp) -> u64 {
        match op {
            GasOp::Intrinsic => self.intrinsic,
            GasOp::StorageRead => self.storage_read,
            GasOp::StorageCreate => self.storage_create,
            GasOp::StorageWrite => self.storage_write,
            GasOp::StorageClear => self.storage_clear,
            GasOp::SignatureCheck => self.signature_check,
            GasOp::AssetTransfer => self.asset_transfer,
            GasOp::AssetPermit => self.asset_permit,
            GasOp::EventLog => self.event_log,
        }
    }

    /// Bookkeeping charged by a successful reservation-mode reimbursement:
    /// authorization read, slot debit (write + pull), payout, event
    pub fn reservation_reimbursement_cost(&self) -> u64 {
        self.storage_read + self.storage_write + 2 * self.asset_transfer + self.event_log
    }

    /// Bookkeeping charged by a successful direct-mode reimbursement: pull, event
    pub fn direct_reimbursement_cost(&self) -> u64 {
        self.asset_transfer + self.event_log
    }
}

/// Running gas counter for one call
#[derive(Debug, Clone, Default)]
pub struct GasMeter {
    schedule: GasSchedule,
    used: u64,
}

impl GasMeter {
    /// Meter charging `schedule`
    pub fn new(schedule: GasSchedule) -> Self {
        Self { schedule, used: 0 }
    }

    /// Charge one operation
    pub fn charge(&mut self, op: GasOp) {
        self.used = self.used.saturating_add(self.schedule.cost(op));
    }

    /// Gas used so far
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Start a new call: reset and charge the intrinsic cost
    pub fn begin_call(&mut self) {
        self.used = 0;
        self.charge(GasOp::Intrinsic);
    }
}

/// Where reimbursement is pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReimbursementMode {
    /// Pull directly from the payer (no reservation, e.g. one-time payments)
    Direct,
    /// Debit the authorization's reservation
    Reservation {
        /// Abort the whole call when the reimbursement would breach the ceiling
        enforce_strict: bool,
    },
}

/// Parameters of one reimbursement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReimbursementRequest {
    /// Gas to recover
    pub gas_used: u64,
    /// Pricing
    pub pricing: GasPricing,
    /// Authorization id (reservation mode)
    pub id: Uuid,
    /// Payer
    pub payer: Address,
    /// Asset the payer is charged in
    pub asset: AssetId,
    /// Source of funds
    pub mode: ReimbursementMode,
}

/// Outcome of one reimbursement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reimbursement {
    /// True when the operator was paid (or nothing was owed)
    pub success: bool,
    /// Amount in the payer's asset
    pub amount: Amount,
}

/// Gas accounting for a wrapped call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasReport {
    /// Gas charged inside the measurement window
    pub measured: u64,
    /// Gas the payer was asked to cover
    pub reimbursable: u64,
    /// Gas the whole call consumed, reimbursement bookkeeping included
    pub total: u64,
    /// Pricing used
    pub pricing: GasPricing,
    /// Reimbursement outcome
    pub reimbursement: Reimbursement,
}

impl GasReport {
    /// Realized reimbursement over the theoretical cost of the whole call
    pub fn accuracy(&self) -> Option<Decimal> {
        let theoretical = amount_in_asset(self.total, &self.pricing).ok()?;
        if theoretical == 0 {
            return None;
        }
        let realized = Decimal::from_u128(self.reimbursement.amount)?;
        let theoretical = Decimal::from_u128(theoretical)?;
        realized.checked_div(theoretical)
    }
}

/// Convert gas into the payer's asset
pub fn amount_in_asset(gas_used: u64, pricing: &GasPricing) -> Result<Amount> {
    u128::from(gas_used)
        .checked_mul(pricing.gas_price)
        .and_then(|wei| wei.checked_mul(pricing.token_price_in_wei))
        .map(|scaled| scaled / PRICE_SCALE)
        .ok_or(Error::ArithmeticOverflow)
}

/// Estimates and caps operator fee recovery
#[derive(Debug, Clone)]
pub struct GasReimbursementMeter {
    config: GasConfig,
}

impl GasReimbursementMeter {
    /// Create from configuration
    pub fn new(config: GasConfig) -> Self {
        Self { config }
    }

    /// Cost model
    pub fn schedule(&self) -> GasSchedule {
        self.config.schedule
    }

    /// Both prices must be strictly positive
    pub fn validate_pricing(pricing: &GasPricing) -> Result<()> {
        if pricing.gas_price == 0 || pricing.token_price_in_wei == 0 {
            return Err(Error::InvalidGasPricing);
        }
        Ok(())
    }

    /// Gas the payer is asked to cover for `measured` gas on `entry`
    pub fn reimbursable_gas(&self, entry: EntryPoint, measured: u64) -> u64 {
        measured
            .saturating_add(self.config.base_overhead)
            .saturating_add(self.config.calibration.for_entry(entry))
    }

    /// Recover `request.gas_used` from the payer and pay it to `operator`
    ///
    /// Only a strict ceiling breach is an error; every other failure is
    /// reported as `success == false`. Callers run this against a working copy
    /// and discard it on failure.
    pub fn reimburse<A: AssetBook>(
        &self,
        registry: &mut SubscriptionRegistry,
        assets: &mut A,
        gas: &mut GasMeter,
        operator: &Address,
        request: &ReimbursementRequest,
    ) -> Result<Reimbursement> {
        Self::validate_pricing(&request.pricing)?;
        let amount = amount_in_asset(request.gas_used, &request.pricing)?;

        match request.mode {
            ReimbursementMode::Direct => {
                if amount == 0 {
                    return Ok(Reimbursement { success: true, amount });
                }
                gas.charge(GasOp::AssetTransfer);
                let spender = registry.ledger().address();
                let success = match assets.transfer_from(
                    &request.asset,
                    &spender,
                    &request.payer,
                    operator,
                    amount,
                ) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(payer = %request.payer, amount, error = %e, "Direct reimbursement pull failed");
                        false
                    }
                };
                Ok(Reimbursement { success, amount })
            }
            ReimbursementMode::Reservation { enforce_strict } => {
                gas.charge(GasOp::StorageRead);
                let subscription = match registry.get(&request.id) {
                    Some(s) if s.active => s,
                    // Nothing left to charge against
                    _ => return Ok(Reimbursement { success: true, amount: 0 }),
                };

                let ceiling = subscription
                    .last_payment_amount
                    .checked_add(amount)
                    .ok_or(Error::ArithmeticOverflow)?;
                if ceiling > subscription.max_amount {
                    if enforce_strict {
                        return Err(Error::MaxAmountExceeded {
                            amount: ceiling,
                            max_amount: subscription.max_amount,
                        });
                    }
                    return Ok(Reimbursement { success: false, amount });
                }
                if amount == 0 {
                    return Ok(Reimbursement { success: true, amount });
                }

                gas.charge(GasOp::StorageWrite);
                gas.charge(GasOp::AssetTransfer);
                if !registry
                    .ledger_mut()
                    .fetch_funds(assets, &request.payer, &request.id, amount)
                {
                    return Ok(Reimbursement { success: false, amount });
                }

                gas.charge(GasOp::AssetTransfer);
                if let Err(e) = registry
                    .ledger_mut()
                    .transfer_out(assets, &request.asset, operator, amount)
                {
                    tracing::warn!(id = %request.id, amount, error = %e, "Reimbursement payout failed");
                    return Ok(Reimbursement { success: false, amount });
                }

                Ok(Reimbursement { success: true, amount })
            }
        }
    }
}
