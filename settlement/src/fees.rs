//! Fee split arithmetic
//!
//! Pure functions: no state, no rounding correction. Integer division truncates.
//!
//! ```text
//! owner_fee = amount * max(fee_bps, MIN_FEE_BPS) / 10_000
//! org_fee   = (amount - owner_fee) * org_fee_bps / 10_000
//! merchant  = amount - owner_fee - org_fee
//! ```

use crate::{Error, Result};
use reservation_ledger::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Basis points denominator (10_000 bps = 100%)
pub const BPS_DENOMINATOR: Amount = 10_000;

/// Maximum fee for owner or organization (10%)
pub const MAX_FEE_BPS: u16 = 1_000;

/// Owner fee floor (0.75%); lower requested fees are raised to it
pub const MIN_FEE_BPS: u16 = 75;

/// Organization taking a share of each payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrganizationFee {
    /// Organization receiving the share (null when `fee_bps` is 0)
    pub organization: Address,

    /// Share of the post-owner-fee amount
    pub fee_bps: u16,
}

impl OrganizationFee {
    /// No organization
    pub fn none() -> Self {
        Self::default()
    }

    /// Organization share
    pub fn new(organization: Address, fee_bps: u16) -> Self {
        Self {
            organization,
            fee_bps,
        }
    }
}

/// Result of a fee split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Paid to the operator
    pub owner_fee: Amount,

    /// Paid to the organization
    pub org_fee: Amount,

    /// Paid to the merchant
    pub merchant_amount: Amount,
}

/// Stateless fee calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct FeeCalculator;

impl FeeCalculator {
    /// Split `amount` into owner fee and organization fee
    pub fn calculate_fee(
        &self,
        amount: Amount,
        fee_bps: u16,
        org_fee: &OrganizationFee,
    ) -> Result<(Amount, Amount)> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if fee_bps > MAX_FEE_BPS {
            return Err(Error::InvalidFeePercentage(fee_bps));
        }
        if org_fee.fee_bps > MAX_FEE_BPS {
            return Err(Error::InvalidFeePercentage(org_fee.fee_bps));
        }

        let effective_bps = fee_bps.max(MIN_FEE_BPS);
        let owner_fee = apply_bps(amount, effective_bps)?;

        let organization_fee = if org_fee.fee_bps > 0 {
            if org_fee.organization.is_zero() {
                return Err(Error::InvalidAddress("organization is null".to_string()));
            }
            apply_bps(amount - owner_fee, org_fee.fee_bps)?
        } else {
            0
        };

        Ok((owner_fee, organization_fee))
    }

    /// Full three-way split
    pub fn split(&self, amount: Amount, fee_bps: u16, org_fee: &OrganizationFee) -> Result<FeeSplit> {
        let (owner_fee, org_fee) = self.calculate_fee(amount, fee_bps, org_fee)?;
        Ok(FeeSplit {
            owner_fee,
            org_fee,
            merchant_amount: amount - owner_fee - org_fee,
        })
    }
}

fn apply_bps(amount: Amount, bps: u16) -> Result<Amount> {
    amount
        .checked_mul(Amount::from(bps))
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(Error::ArithmeticOverflow)
}
