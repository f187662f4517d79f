//! Core types for the settlement engine

use crate::fees::OrganizationFee;
use chrono::{DateTime, Duration, Utc};
use reservation_ledger::{Address, Amount, AssetId, ReservationProof};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Shortest allowed billing period
pub fn min_frequency() -> Duration {
    Duration::days(7)
}

/// How an authorization is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingMode {
    /// Fixed amount on a fixed grid starting at creation
    Regular,
    /// Metered amount billed after each period of usage
    UsageBased,
}

/// Payment authorization (subscription)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Authorization id
    pub id: Uuid,

    /// Payer who signed the creation message
    pub signer: Address,

    /// Earliest time the next execution may run
    pub next_due: DateTime<Utc>,

    /// Active until cancelled (terminal)
    pub active: bool,

    /// Usage-based only: next execution is final
    pub stopped: bool,

    /// Every payment must stay strictly below this ceiling
    pub max_amount: Amount,

    /// Amount of the most recent payment (creation amount before the first)
    pub last_payment_amount: Amount,

    /// Creation signature, re-verified on every execution
    pub signature: Vec<u8>,

    /// Billing mode
    pub billing: BillingMode,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// True for usage-based authorizations
    pub fn is_usage_based(&self) -> bool {
        self.billing == BillingMode::UsageBased
    }
}

/// Create an authorization
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    /// Authorization id chosen by the payer
    pub id: Uuid,
    /// Payer (must be the signer)
    pub payer: Address,
    /// Merchant receiving payments
    pub merchant: Address,
    /// Asset pulled
    pub asset: AssetId,
    /// Expected per-period amount
    pub amount: Amount,
    /// Per-payment ceiling
    pub max_amount: Amount,
    /// Billing period
    pub frequency: Duration,
    /// Reservation backing the authorization
    pub proof: ReservationProof,
    /// Organization bound into the signature (may be null)
    pub organization: Address,
    /// CreateAuthorization signature by the payer
    pub signature: Vec<u8>,
}

/// Execute a due payment
#[derive(Debug, Clone)]
pub struct ExecuteSubscription {
    /// Authorization id
    pub id: Uuid,
    /// Payer
    pub payer: Address,
    /// Merchant (must match the signed value)
    pub merchant: Address,
    /// Asset (must match the signed value)
    pub asset: AssetId,
    /// Amount to settle
    pub amount: Amount,
    /// Billing period (must match the signed value)
    pub frequency: Duration,
    /// Requested operator fee
    pub fee_bps: u16,
    /// Organization share (organization must match the signed value)
    pub org_fee: OrganizationFee,
}

/// One-shot payment without an authorization
#[derive(Debug, Clone)]
pub struct OneTimePayment {
    /// Payer
    pub payer: Address,
    /// Merchant
    pub merchant: Address,
    /// Asset (`Address::NATIVE` for the native variant)
    pub asset: AssetId,
    /// Amount
    pub amount: Amount,
    /// Requested operator fee
    pub fee_bps: u16,
    /// Organization share
    pub org_fee: OrganizationFee,
}

/// Gas pricing supplied by the operator for reimbursement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPricing {
    /// Price per gas unit in native wei
    pub gas_price: u128,

    /// Asset price factor in wei (scaled by 1e18)
    pub token_price_in_wei: u128,
}

impl GasPricing {
    /// Create pricing
    pub fn new(gas_price: u128, token_price_in_wei: u128) -> Self {
        Self {
            gas_price,
            token_price_in_wei,
        }
    }
}

/// Independently invocable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// One-shot native payment
    PayNative,
    /// One-shot asset payment
    PayToken,
    /// Create regular authorization
    CreateSubscription,
    /// Execute regular authorization
    ExecuteSubscription,
    /// Cancel by payer signature
    CancelSubscription,
    /// Privileged cancel
    ForceCancel,
    /// Create usage-based authorization
    CreateUsageBased,
    /// Execute usage-based authorization
    ExecuteUsageBased,
    /// Stop usage-based authorization
    StopUsageBased,
    /// Raise reservation
    IncreaseAllowance,
    /// Change per-payment ceiling
    UpdateMaxAmount,
    /// Create allocation unit
    CreateAllocationUnit,
    /// Dual-signature owner replacement
    TransferOwnership,
}

impl EntryPoint {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::PayNative => "pay_native",
            EntryPoint::PayToken => "pay_token",
            EntryPoint::CreateSubscription => "create_subscription",
            EntryPoint::ExecuteSubscription => "execute_subscription",
            EntryPoint::CancelSubscription => "cancel_subscription",
            EntryPoint::ForceCancel => "force_cancel",
            EntryPoint::CreateUsageBased => "create_usage_based",
            EntryPoint::ExecuteUsageBased => "execute_usage_based",
            EntryPoint::StopUsageBased => "stop_usage_based",
            EntryPoint::IncreaseAllowance => "increase_allowance",
            EntryPoint::UpdateMaxAmount => "update_max_amount",
            EntryPoint::CreateAllocationUnit => "create_allocation_unit",
            EntryPoint::TransferOwnership => "transfer_ownership",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
