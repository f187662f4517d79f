//! Settlement events
//!
//! Every committed entry point produces at least one event. A call buffers its
//! events in its working copy and they reach the `EventLog` only on commit, so
//! a failed call leaves none behind.

use crate::fees::FeeSplit;
use crate::types::{BillingMode, EntryPoint};
use chrono::{DateTime, Utc};
use reservation_ledger::{Address, Amount, AssetId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Success and failure signals emitted by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// One-shot payment settled
    PaymentProcessed {
        /// Payer
        payer: Address,
        /// Merchant
        merchant: Address,
        /// Asset (`Address::NATIVE` for native payments)
        asset: AssetId,
        /// Gross amount
        amount: Amount,
        /// Distribution
        split: FeeSplit,
    },

    /// Authorization created
    SubscriptionCreated {
        /// Authorization id
        id: Uuid,
        /// Payer / signer
        payer: Address,
        /// Merchant
        merchant: Address,
        /// Asset
        asset: AssetId,
        /// Allocation unit backing the reservation
        unit: UnitId,
        /// Reserved ceiling
        reserved: Amount,
        /// Billing mode
        billing: BillingMode,
        /// First due date
        next_due: DateTime<Utc>,
    },

    /// Recurring payment settled
    SubscriptionExecuted {
        /// Authorization id
        id: Uuid,
        /// Payer
        payer: Address,
        /// Merchant
        merchant: Address,
        /// Gross amount
        amount: Amount,
        /// Distribution
        split: FeeSplit,
        /// Next due date (absent when the execution was final)
        next_due: Option<DateTime<Utc>>,
    },

    /// Authorization deleted
    SubscriptionCancelled {
        /// Authorization id
        id: Uuid,
        /// Payer / signer
        payer: Address,
        /// True for privileged cancellation
        forced: bool,
    },

    /// Usage-based authorization marked final
    UsageBasedStopped {
        /// Authorization id
        id: Uuid,
    },

    /// Reservation ceiling raised
    AllowanceIncreased {
        /// Authorization id
        id: Uuid,
        /// Payer
        payer: Address,
        /// New ceiling
        amount: Amount,
    },

    /// Per-payment ceiling changed
    MaxAmountUpdated {
        /// Authorization id
        id: Uuid,
        /// New ceiling
        max_amount: Amount,
    },

    /// Allocation unit created
    AllocationUnitCreated {
        /// Unit id
        unit: UnitId,
        /// Unit spender identity
        address: Address,
    },

    /// Operator recovered its network fee
    GasReimbursed {
        /// Wrapped entry point
        entry: EntryPoint,
        /// Payer
        payer: Address,
        /// Asset
        asset: AssetId,
        /// Gas covered
        gas: u64,
        /// Amount in the payer's asset
        amount: Amount,
    },

    /// Reimbursement failed; the primary effect still committed
    ReimbursementFailed {
        /// Wrapped entry point
        entry: EntryPoint,
        /// Authorization id (nil for one-shot payments)
        id: Uuid,
        /// Payer
        payer: Address,
        /// Gas left unpaid
        gas: u64,
        /// Amount owed in the payer's asset
        amount: Amount,
    },

    /// Owner replaced
    OwnershipTransferred {
        /// Previous owner
        previous: Address,
        /// New owner
        owner: Address,
    },
}

impl SettlementEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::PaymentProcessed { .. } => "payment_processed",
            SettlementEvent::SubscriptionCreated { .. } => "subscription_created",
            SettlementEvent::SubscriptionExecuted { .. } => "subscription_executed",
            SettlementEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
            SettlementEvent::UsageBasedStopped { .. } => "usage_based_stopped",
            SettlementEvent::AllowanceIncreased { .. } => "allowance_increased",
            SettlementEvent::MaxAmountUpdated { .. } => "max_amount_updated",
            SettlementEvent::AllocationUnitCreated { .. } => "allocation_unit_created",
            SettlementEvent::GasReimbursed { .. } => "gas_reimbursed",
            SettlementEvent::ReimbursementFailed { .. } => "reimbursement_failed",
            SettlementEvent::OwnershipTransferred { .. } => "ownership_transferred",
        }
    }
}

/// Committed events awaiting a drain
///
/// Holds at most `capacity` events; older ones are evicted first.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<SettlementEvent>,
    capacity: usize,
}

impl EventLog {
    /// Create an empty log
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
        }
    }

    /// Append one call's events, returning how many old events were evicted
    pub fn append(&mut self, events: Vec<SettlementEvent>) -> usize {
        self.events.extend(events);
        let evicted = self.events.len().saturating_sub(self.capacity);
        self.events.drain(..evicted);
        evicted
    }

    /// Take every pending event, oldest first
    pub fn drain(&mut self) -> Vec<SettlementEvent> {
        self.events.drain(..).collect()
    }

    /// Pending events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
