//! Settlement executor
//!
//! The entry-point surface. Each call:
//!
//! 1. Claims the state for the calling thread (a call re-entering from the same
//!    thread fails with `ReentrantCall`, calls from other threads wait)
//! 2. Clones the committed state into a working copy
//! 3. Runs the operation against the copy, metering gas
//! 4. For wrapped entry points, reimburses the operator from a nested copy
//! 5. Replaces the committed state with the copy only on success and moves the
//!    call's buffered events into the event log
//!
//! An asset book that calls back into the executor from another thread while
//! holding up the outer call deadlocks; callbacks must stay on the calling
//! thread.
//!
//! ```text
//!  caller ──▶ enter() ──▶ working = state.clone()
//!                              │
//!                              ▼
//!                        operation(working)  ── Err ──▶ discard, return Err
//!                              │
//!                              ▼
//!                   attempt = working.clone()
//!                   reimburse(attempt)  ── strict breach ──▶ discard all, return Err
//!                      │            │
//!                   success       failure
//!                      │            │
//!            working = attempt   emit ReimbursementFailed on working
//!                      │            │
//!                      └─────┬──────┘
//!                            ▼
//!                     state = working
//! ```

use crate::admin::OwnerConfig;
use crate::clock::Clock;
use crate::config::Config;
use crate::events::{EventLog, SettlementEvent};
use crate::fees::FeeSplit;
use crate::gas::{
    GasMeter, GasOp, GasReimbursementMeter, GasReport, Reimbursement, ReimbursementMode,
    ReimbursementRequest,
};
use crate::metrics::Metrics;
use crate::subscription::{Executed, SubscriptionRegistry};
use crate::types::{
    BillingMode, CreateSubscription, EntryPoint, ExecuteSubscription, GasPricing, OneTimePayment,
    Subscription,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use reservation_ledger::{
    Address, Amount, AssetBook, AssetId, Domain, ReservationProof, ReservationRegistry,
    SignatureAuthority, UnitId,
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Committed engine state; cloned per call
#[derive(Debug, Clone)]
struct State<A> {
    registry: SubscriptionRegistry,
    assets: A,
    admin: OwnerConfig,
    /// Events of the call in progress; empty between calls
    events: Vec<SettlementEvent>,
    gas: GasMeter,
}

impl<A> State<A> {
    fn emit(&mut self, event: SettlementEvent) {
        self.gas.charge(GasOp::EventLog);
        tracing::debug!(event = event.name(), "Event emitted");
        self.events.push(event);
    }
}

/// Who pays a wrapped call's gas
struct ReimbursementTarget {
    id: Uuid,
    payer: Address,
    asset: AssetId,
}

/// Result of a committed call
#[derive(Debug, Clone)]
pub struct Receipt<T> {
    /// Operation output
    pub output: T,

    /// Gas consumed by the whole call
    pub gas_used: u64,

    /// Reimbursement accounting (wrapped entry points only)
    pub gas: Option<GasReport>,
}

/// Exclusive access to the state for one call
///
/// The writer is cleared before the state lock is released.
struct CallGuard<'a, A> {
    state: MutexGuard<'a, State<A>>,
    writer: &'a Mutex<Option<ThreadId>>,
}

impl<A> Deref for CallGuard<'_, A> {
    type Target = State<A>;

    fn deref(&self) -> &State<A> {
        &self.state
    }
}

impl<A> DerefMut for CallGuard<'_, A> {
    fn deref_mut(&mut self) -> &mut State<A> {
        &mut self.state
    }
}

impl<A> Drop for CallGuard<'_, A> {
    fn drop(&mut self) {
        *self.writer.lock() = None;
    }
}

/// Entry points of the settlement engine
pub struct SettlementExecutor<A: AssetBook> {
    state: Mutex<State<A>>,
    writer: Mutex<Option<ThreadId>>,
    log: Mutex<EventLog>,
    clock: Arc<dyn Clock>,
    meter: GasReimbursementMeter,
    config: Config,
    metrics: Metrics,
}

impl<A: AssetBook> std::fmt::Debug for SettlementExecutor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementExecutor")
            .field("service", &self.config.service_name)
            .field("busy", &self.writer.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<A: AssetBook> SettlementExecutor<A> {
    /// Create an executor
    ///
    /// `address` is the engine's identity: it verifies typed signatures, owns
    /// the allocation units and holds funds between debit and payout.
    pub fn new(
        config: Config,
        address: Address,
        admin: OwnerConfig,
        assets: A,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let domain = Domain::new(
            config.domain.name.clone(),
            config.domain.version.clone(),
            config.domain.chain_id,
            address,
        );
        let authority = SignatureAuthority::new(domain)?;
        let ledger = ReservationRegistry::new(address)?;
        let registry =
            SubscriptionRegistry::new(ledger, authority, config.usage_based.grace_period()?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            address = %address,
            owner = %admin.owner(),
            "Settlement executor started"
        );

        Ok(Self {
            state: Mutex::new(State {
                registry,
                assets,
                admin,
                events: Vec::new(),
                gas: GasMeter::new(config.gas.schedule),
            }),
            writer: Mutex::new(None),
            log: Mutex::new(EventLog::new(config.events.capacity)),
            clock,
            meter: GasReimbursementMeter::new(config.gas.clone()),
            config,
            metrics,
        })
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn enter(&self) -> Result<CallGuard<'_, A>> {
        let current = thread::current().id();
        if *self.writer.lock() == Some(current) {
            return Err(Error::ReentrantCall);
        }
        let state = self.state.lock();
        *self.writer.lock() = Some(current);
        Ok(CallGuard {
            state,
            writer: &self.writer,
        })
    }

    /// Run an operation atomically
    fn call<T>(
        &self,
        entry: EntryPoint,
        operation: impl FnOnce(&mut State<A>, DateTime<Utc>) -> Result<T>,
    ) -> Result<Receipt<T>> {
        self.transact(entry, |working, now| {
            operation(working, now).map(|output| (output, None))
        })
    }

    /// Run an operation atomically and reimburse its gas
    fn wrapped<T>(
        &self,
        entry: EntryPoint,
        pricing: GasPricing,
        mode: ReimbursementMode,
        operation: impl FnOnce(&mut State<A>, DateTime<Utc>) -> Result<(T, ReimbursementTarget)>,
    ) -> Result<Receipt<T>> {
        self.transact(entry, |working, now| {
            GasReimbursementMeter::validate_pricing(&pricing)?;

            let start = working.gas.used();
            let (output, target) = operation(working, now)?;
            let measured = working.gas.used() - start;

            let reimbursement = self.reimburse(working, entry, pricing, mode, measured, &target)?;
            let report = GasReport {
                measured,
                reimbursable: self.meter.reimbursable_gas(entry, measured),
                total: working.gas.used(),
                pricing,
                reimbursement,
            };
            tracing::debug!(
                entry = %entry,
                measured = report.measured,
                reimbursable = report.reimbursable,
                total = report.total,
                accuracy = ?report.accuracy(),
                "Gas metered"
            );
            Ok((output, Some(report)))
        })
    }

    fn transact<T>(
        &self,
        entry: EntryPoint,
        operation: impl FnOnce(&mut State<A>, DateTime<Utc>) -> Result<(T, Option<GasReport>)>,
    ) -> Result<Receipt<T>> {
        let mut state = match self.enter() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(entry = %entry, "Re-entrant call rejected");
                self.metrics.record_rejection(entry, e.category());
                return Err(e);
            }
        };

        let now = self.clock.now();
        let mut working = state.clone();
        working.gas.begin_call();

        match operation(&mut working, now) {
            Ok((output, gas)) => {
                let gas_used = working.gas.used();
                let events = std::mem::take(&mut working.events);
                *state = working;
                let evicted = self.log.lock().append(events);
                if evicted > 0 {
                    tracing::warn!(evicted, "Event log full, oldest events dropped");
                    self.metrics.record_events_dropped(evicted);
                }
                self.metrics.record_call(entry);
                Ok(Receipt {
                    output,
                    gas_used,
                    gas,
                })
            }
            Err(e) => {
                tracing::warn!(entry = %entry, error = %e, "Call rejected");
                self.metrics.record_rejection(entry, e.category());
                Err(e)
            }
        }
    }

    fn reimburse(
        &self,
        working: &mut State<A>,
        entry: EntryPoint,
        pricing: GasPricing,
        mode: ReimbursementMode,
        measured: u64,
        target: &ReimbursementTarget,
    ) -> Result<Reimbursement> {
        let request = ReimbursementRequest {
            gas_used: self.meter.reimbursable_gas(entry, measured),
            pricing,
            id: target.id,
            payer: target.payer,
            asset: target.asset,
            mode,
        };

        let mut attempt = working.clone();
        let operator = attempt.admin.owner();
        let State {
            registry,
            assets,
            gas,
            ..
        } = &mut attempt;
        let outcome = self
            .meter
            .reimburse(registry, assets, gas, &operator, &request)?;

        if outcome.success {
            attempt.emit(SettlementEvent::GasReimbursed {
                entry,
                payer: target.payer,
                asset: target.asset,
                gas: request.gas_used,
                amount: outcome.amount,
            });
            *working = attempt;
        } else {
            tracing::warn!(
                entry = %entry,
                id = %target.id,
                payer = %target.payer,
                gas = request.gas_used,
                amount = outcome.amount,
                "Gas reimbursement failed"
            );
            working.emit(SettlementEvent::ReimbursementFailed {
                entry,
                id: target.id,
                payer: target.payer,
                gas: request.gas_used,
                amount: outcome.amount,
            });
        }
        self.metrics
            .record_reimbursement(outcome.success, request.gas_used);
        Ok(outcome)
    }

    /// One-shot payment in the native currency, sent by the payer
    pub fn pay_native(&self, caller: &Address, payment: &OneTimePayment) -> Result<Receipt<FeeSplit>> {
        self.call(EntryPoint::PayNative, |state, _now| {
            if *caller != payment.payer {
                return Err(Error::Unauthorized(*caller));
            }
            if payment.asset != Address::NATIVE {
                return Err(Error::InvalidAddress(format!(
                    "native payment in asset {}",
                    payment.asset
                )));
            }
            let split = state.pay_one_time(payment, false)?;
            Ok(split)
        })
    }

    /// One-shot asset payment pulled from the payer by the operator
    ///
    /// The payer must have approved the engine address for the amount plus
    /// the reimbursement.
    pub fn pay_token(
        &self,
        caller: &Address,
        payment: &OneTimePayment,
        pricing: GasPricing,
    ) -> Result<Receipt<FeeSplit>> {
        self.wrapped(
            EntryPoint::PayToken,
            pricing,
            ReimbursementMode::Direct,
            |state, _now| {
                state.admin.require_owner(caller)?;
                if payment.asset.is_zero() || payment.asset == Address::NATIVE {
                    return Err(Error::InvalidAddress(format!(
                        "asset payment in {}",
                        payment.asset
                    )));
                }
                let split = state.pay_one_time(payment, true)?;
                Ok((
                    split,
                    ReimbursementTarget {
                        id: Uuid::nil(),
                        payer: payment.payer,
                        asset: payment.asset,
                    },
                ))
            },
        )
    }

    /// Create a regular authorization
    pub fn create_subscription(
        &self,
        caller: &Address,
        request: &CreateSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Subscription>> {
        self.create(EntryPoint::CreateSubscription, BillingMode::Regular, caller, request, pricing)
    }

    /// Create a usage-based authorization
    pub fn create_usage_based(
        &self,
        caller: &Address,
        request: &CreateSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Subscription>> {
        self.create(EntryPoint::CreateUsageBased, BillingMode::UsageBased, caller, request, pricing)
    }

    fn create(
        &self,
        entry: EntryPoint,
        billing: BillingMode,
        caller: &Address,
        request: &CreateSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Subscription>> {
        self.wrapped(
            entry,
            pricing,
            ReimbursementMode::Reservation {
                enforce_strict: true,
            },
            |state, now| {
                state.admin.require_owner(caller)?;
                let created = state.registry.create(
                    &mut state.assets,
                    &mut state.gas,
                    request,
                    billing,
                    now,
                )?;
                state.emit(SettlementEvent::SubscriptionCreated {
                    id: request.id,
                    payer: request.payer,
                    merchant: request.merchant,
                    asset: request.asset,
                    unit: created.unit,
                    reserved: created.reserved,
                    billing,
                    next_due: created.subscription.next_due,
                });
                Ok((
                    created.subscription,
                    ReimbursementTarget {
                        id: request.id,
                        payer: request.payer,
                        asset: request.asset,
                    },
                ))
            },
        )
    }

    /// Execute a due regular payment
    pub fn execute_subscription(
        &self,
        caller: &Address,
        request: &ExecuteSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Executed>> {
        self.execute(EntryPoint::ExecuteSubscription, BillingMode::Regular, caller, request, pricing)
    }

    /// Execute a due usage-based payment
    pub fn execute_usage_based(
        &self,
        caller: &Address,
        request: &ExecuteSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Executed>> {
        self.execute(EntryPoint::ExecuteUsageBased, BillingMode::UsageBased, caller, request, pricing)
    }

    fn execute(
        &self,
        entry: EntryPoint,
        billing: BillingMode,
        caller: &Address,
        request: &ExecuteSubscription,
        pricing: GasPricing,
    ) -> Result<Receipt<Executed>> {
        self.wrapped(
            entry,
            pricing,
            ReimbursementMode::Reservation {
                enforce_strict: true,
            },
            |state, now| {
                state.admin.require_owner(caller)?;
                let operator = state.admin.owner();
                let executed = state.registry.execute(
                    &mut state.assets,
                    &mut state.gas,
                    request,
                    billing,
                    &operator,
                    now,
                )?;
                state.emit(SettlementEvent::SubscriptionExecuted {
                    id: request.id,
                    payer: request.payer,
                    merchant: request.merchant,
                    amount: request.amount,
                    split: executed.split,
                    next_due: executed.next_due,
                });
                if executed.next_due.is_none() {
                    state.emit(SettlementEvent::SubscriptionCancelled {
                        id: request.id,
                        payer: request.payer,
                        forced: false,
                    });
                }
                Ok((
                    executed,
                    ReimbursementTarget {
                        id: request.id,
                        payer: request.payer,
                        asset: request.asset,
                    },
                ))
            },
        )
    }

    /// Cancel with the payer's signature; `false` when already inactive
    pub fn cancel_subscription(
        &self,
        caller: &Address,
        id: Uuid,
        signature: &[u8],
    ) -> Result<Receipt<bool>> {
        self.call(EntryPoint::CancelSubscription, |state, now| {
            state.admin.require_owner(caller)?;
            let cancelled = state.registry.cancel(&mut state.gas, &id, signature, now)?;
            Ok(state.cancelled(id, cancelled, false))
        })
    }

    /// Privileged cancel for disputes; `false` when already inactive
    pub fn force_cancel(&self, caller: &Address, id: Uuid) -> Result<Receipt<bool>> {
        self.call(EntryPoint::ForceCancel, |state, _now| {
            state.admin.require_owner(caller)?;
            let cancelled = state.registry.force_cancel(&mut state.gas, &id)?;
            Ok(state.cancelled(id, cancelled, true))
        })
    }

    /// Mark a usage-based authorization final
    pub fn stop_usage_based(&self, caller: &Address, id: Uuid, signature: &[u8]) -> Result<Receipt<()>> {
        self.call(EntryPoint::StopUsageBased, |state, _now| {
            state.admin.require_owner(caller)?;
            state.registry.stop_usage_based(&mut state.gas, &id, signature)?;
            state.emit(SettlementEvent::UsageBasedStopped { id });
            Ok(())
        })
    }

    /// Raise an authorization's reservation ceiling
    ///
    /// A failed reimbursement never blocks the increase.
    pub fn increase_allowance(
        &self,
        caller: &Address,
        id: Uuid,
        payer: &Address,
        proof: &ReservationProof,
        pricing: GasPricing,
    ) -> Result<Receipt<Amount>> {
        self.wrapped(
            EntryPoint::IncreaseAllowance,
            pricing,
            ReimbursementMode::Reservation {
                enforce_strict: false,
            },
            |state, now| {
                state.admin.require_owner(caller)?;
                let amount = state.registry.increase_allowance(
                    &mut state.assets,
                    &mut state.gas,
                    &id,
                    payer,
                    proof,
                    now,
                )?;
                let asset = state
                    .registry
                    .ledger()
                    .stream(payer, &id)
                    .map(|record| record.asset)
                    .ok_or(Error::SubscriptionNotActive(id))?;
                state.emit(SettlementEvent::AllowanceIncreased {
                    id,
                    payer: *payer,
                    amount,
                });
                Ok((
                    amount,
                    ReimbursementTarget {
                        id,
                        payer: *payer,
                        asset,
                    },
                ))
            },
        )
    }

    /// Change an authorization's per-payment ceiling
    pub fn update_max_amount(
        &self,
        caller: &Address,
        id: Uuid,
        new_max_amount: Amount,
        signature: &[u8],
    ) -> Result<Receipt<()>> {
        self.call(EntryPoint::UpdateMaxAmount, |state, _now| {
            state.admin.require_owner(caller)?;
            state
                .registry
                .update_max_amount(&mut state.gas, &id, new_max_amount, signature)?;
            state.emit(SettlementEvent::MaxAmountUpdated {
                id,
                max_amount: new_max_amount,
            });
            Ok(())
        })
    }

    /// Create an allocation unit ahead of demand
    pub fn create_allocation_unit(&self, caller: &Address) -> Result<Receipt<UnitId>> {
        self.call(EntryPoint::CreateAllocationUnit, |state, _now| {
            state.admin.require_owner(caller)?;
            state.gas.charge(GasOp::StorageCreate);
            let ledger = state.registry.ledger_mut();
            let unit = ledger.new_unit()?;
            let address = ledger.unit(unit)?.address();
            state.emit(SettlementEvent::AllocationUnitCreated { unit, address });
            Ok(unit)
        })
    }

    /// Replace the owner with owner and cosigner signatures over `UpdateOwner`
    pub fn transfer_ownership(
        &self,
        caller: &Address,
        new_owner: Address,
        owner_signature: &[u8],
        cosigner_signature: &[u8],
    ) -> Result<Receipt<Address>> {
        self.call(EntryPoint::TransferOwnership, |state, _now| {
            state.admin.require_owner(caller)?;
            state.gas.charge(GasOp::SignatureCheck);
            state.gas.charge(GasOp::SignatureCheck);
            let previous = state.admin.transfer_ownership(
                state.registry.authority(),
                new_owner,
                owner_signature,
                cosigner_signature,
            )?;
            state.gas.charge(GasOp::StorageWrite);
            state.emit(SettlementEvent::OwnershipTransferred {
                previous,
                owner: new_owner,
            });
            Ok(previous)
        })
    }

    fn read<T>(&self, query: impl FnOnce(&State<A>) -> T) -> Result<T> {
        let state = self.enter()?;
        Ok(query(&state))
    }

    /// Authorization by id
    pub fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>> {
        self.read(|state| state.registry.get(id).cloned())
    }

    /// First unit without a slot for (payer, asset); `None` means a new unit is needed
    pub fn available_unit(&self, payer: &Address, asset: &AssetId) -> Result<Option<UnitId>> {
        self.read(|state| state.registry.ledger().available_unit(payer, asset))
    }

    /// Unit backing (payer, id)
    pub fn current_unit(&self, payer: &Address, id: &Uuid) -> Result<Option<UnitId>> {
        self.read(|state| state.registry.ledger().current_unit(payer, id))
    }

    /// Spender identity of a unit (the address payers approve)
    pub fn unit_address(&self, unit: UnitId) -> Result<Address> {
        self.read(|state| {
            state
                .registry
                .ledger()
                .unit(unit)
                .map(|u| u.address())
                .map_err(Error::from)
        })?
    }

    /// Reservation left for (payer, id)
    pub fn remaining_allowance(&self, payer: &Address, id: &Uuid) -> Result<Amount> {
        self.read(|state| state.registry.ledger().remaining(payer, id).map_err(Error::from))?
    }

    /// Current owner
    pub fn owner(&self) -> Result<Address> {
        self.read(|state| state.admin.owner())
    }

    /// Signature authority payers sign against
    pub fn authority(&self) -> Result<SignatureAuthority> {
        self.read(|state| state.registry.authority().clone())
    }

    /// Take all committed events
    pub fn drain_events(&self) -> Result<Vec<SettlementEvent>> {
        let _state = self.enter()?;
        Ok(self.log.lock().drain())
    }

    /// Inspect the asset book
    pub fn with_assets<T>(&self, f: impl FnOnce(&A) -> T) -> Result<T> {
        self.read(|state| f(&state.assets))
    }

    /// Apply movements made outside the engine (deposits, approvals)
    pub fn with_assets_mut<T>(&self, f: impl FnOnce(&mut A) -> T) -> Result<T> {
        let mut state = self.enter()?;
        Ok(f(&mut state.assets))
    }
}

impl<A: AssetBook> State<A> {
    /// Split and send a one-shot payment
    ///
    /// Asset payments are pulled by the engine (`pull`); native payments are
    /// sent by the payer.
    fn pay_one_time(&mut self, payment: &OneTimePayment, pull: bool) -> Result<FeeSplit> {
        if payment.payer.is_zero() {
            return Err(Error::InvalidAddress("payer is null".to_string()));
        }
        if payment.merchant.is_zero() {
            return Err(Error::InvalidAddress("merchant is null".to_string()));
        }

        let split = self
            .registry
            .fees()
            .split(payment.amount, payment.fee_bps, &payment.org_fee)?;
        let spender = self.registry.ledger().address();
        let operator = self.admin.owner();

        for (recipient, amount) in [
            (operator, split.owner_fee),
            (payment.org_fee.organization, split.org_fee),
            (payment.merchant, split.merchant_amount),
        ] {
            if amount == 0 {
                continue;
            }
            self.gas.charge(GasOp::AssetTransfer);
            let moved = if pull {
                self.assets
                    .transfer_from(&payment.asset, &spender, &payment.payer, &recipient, amount)
            } else {
                self.assets
                    .transfer(&payment.asset, &payment.payer, &recipient, amount)
            };
            moved.map_err(|e| Error::TransferFailed(e.to_string()))?;
        }

        tracing::info!(
            payer = %payment.payer,
            merchant = %payment.merchant,
            asset = %payment.asset,
            amount = payment.amount,
            owner_fee = split.owner_fee,
            "One-time payment processed"
        );
        self.emit(SettlementEvent::PaymentProcessed {
            payer: payment.payer,
            merchant: payment.merchant,
            asset: payment.asset,
            amount: payment.amount,
            split,
        });
        Ok(split)
    }

    fn cancelled(&mut self, id: Uuid, cancelled: Option<Subscription>, forced: bool) -> bool {
        match cancelled {
            Some(subscription) => {
                self.emit(SettlementEvent::SubscriptionCancelled {
                    id,
                    payer: subscription.signer,
                    forced,
                });
                true
            }
            None => false,
        }
    }
}
