//! Authorization state machine
//!
//! States: absent -> Active -> absent. A deleted authorization is never
//! resurrected; a new one needs a fresh id.
//!
//! Every execution re-verifies the creation signature against the merchant,
//! asset, frequency and organization supplied by the current call, so a
//! payment can only go where the payer originally agreed.

use crate::fees::{FeeCalculator, FeeSplit};
use crate::gas::{GasMeter, GasOp};
use crate::types::{
    min_frequency, BillingMode, CreateSubscription, ExecuteSubscription, Subscription,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use reservation_ledger::{
    Address, Amount, AssetBook, ReservationProof, ReservationRegistry, SignatureAuthority,
    TypedMessage, UnitId,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Result of a successful create
#[derive(Debug, Clone)]
pub struct Created {
    /// Stored authorization
    pub subscription: Subscription,
    /// Unit backing the reservation
    pub unit: UnitId,
    /// Reserved ceiling
    pub reserved: Amount,
}

/// Result of a successful execution
#[derive(Debug, Clone, Copy)]
pub struct Executed {
    /// Distribution of the payment
    pub split: FeeSplit,
    /// Next due date, `None` when the authorization was finalized
    pub next_due: Option<DateTime<Utc>>,
}

/// Owns authorizations and the reservation ledger backing them
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<Uuid, Subscription>,
    ledger: ReservationRegistry,
    authority: SignatureAuthority,
    fees: FeeCalculator,
    grace_period: Duration,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new(ledger: ReservationRegistry, authority: SignatureAuthority, grace_period: Duration) -> Self {
        Self {
            subscriptions: HashMap::new(),
            ledger,
            authority,
            fees: FeeCalculator,
            grace_period,
        }
    }

    /// Signature authority for this deployment
    pub fn authority(&self) -> &SignatureAuthority {
        &self.authority
    }

    /// Reservation ledger
    pub fn ledger(&self) -> &ReservationRegistry {
        &self.ledger
    }

    /// Reservation ledger (mutable)
    pub fn ledger_mut(&mut self) -> &mut ReservationRegistry {
        &mut self.ledger
    }

    /// Fee calculator
    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Authorization by id
    pub fn get(&self, id: &Uuid) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    fn active(&self, id: &Uuid) -> Result<&Subscription> {
        self.subscriptions
            .get(id)
            .filter(|s| s.active)
            .ok_or(Error::SubscriptionNotActive(*id))
    }

    fn active_mut(&mut self, id: &Uuid) -> Result<&mut Subscription> {
        self.subscriptions
            .get_mut(id)
            .filter(|s| s.active)
            .ok_or(Error::SubscriptionNotActive(*id))
    }

    fn verify(
        &self,
        gas: &mut GasMeter,
        message: &TypedMessage,
        signer: &Address,
        signature: &[u8],
    ) -> Result<()> {
        gas.charge(GasOp::SignatureCheck);
        if !self.authority.verify(message, signer, signature)? {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }

    /// Create an authorization and reserve its funds
    pub fn create<A: AssetBook>(
        &mut self,
        assets: &mut A,
        gas: &mut GasMeter,
        request: &CreateSubscription,
        billing: BillingMode,
        now: DateTime<Utc>,
    ) -> Result<Created> {
        if request.frequency < min_frequency() {
            return Err(Error::InvalidFrequency(request.frequency.num_seconds()));
        }
        // The first period must end on a representable date
        shift(now, request.frequency)
            .map_err(|_| Error::InvalidFrequency(request.frequency.num_seconds()))?;
        if request.merchant.is_zero() {
            return Err(Error::InvalidAddress("merchant is null".to_string()));
        }
        if request.asset.is_zero() {
            return Err(Error::InvalidAddress("asset is null".to_string()));
        }
        if request.max_amount <= request.amount {
            return Err(Error::InvalidMaxAmount {
                max_amount: request.max_amount,
                floor: request.amount,
            });
        }

        let message = TypedMessage::CreateAuthorization {
            merchant: request.merchant,
            asset: request.asset,
            frequency_secs: frequency_secs(request.frequency)?,
            id: request.id,
            organization: request.organization,
        };
        self.verify(gas, &message, &request.payer, &request.signature)?;

        gas.charge(GasOp::StorageRead);
        if self.subscriptions.get(&request.id).is_some_and(|s| s.active) {
            return Err(Error::SubscriptionAlreadyExists(request.id));
        }

        gas.charge(GasOp::StorageRead);
        let unit = match self.ledger.available_unit(&request.payer, &request.asset) {
            Some(unit) => unit,
            None => {
                gas.charge(GasOp::StorageCreate);
                self.ledger.new_unit()?
            }
        };

        let allowance = match &request.proof {
            ReservationProof::Delegated(proof) => {
                gas.charge(GasOp::AssetPermit);
                proof.value
            }
            ReservationProof::ExistingAllowance => {
                let spender = self.ledger.unit(unit)?.address();
                assets.allowance(&request.asset, &request.payer, &spender)
            }
        };
        if allowance <= request.amount {
            return Err(Error::InsufficientAllowance(format!(
                "reservation {} must exceed amount {}",
                allowance, request.amount
            )));
        }

        gas.charge(GasOp::StorageCreate);
        gas.charge(GasOp::StorageCreate);
        let reserved = self.ledger.create_stream(
            assets,
            &request.payer,
            request.id,
            &request.asset,
            unit,
            &request.proof,
            now,
        )?;

        let next_due = match billing {
            BillingMode::Regular => now,
            // No usage to bill before the first period ends
            BillingMode::UsageBased => shift(now, request.frequency)?,
        };

        let subscription = Subscription {
            id: request.id,
            signer: request.payer,
            next_due,
            active: true,
            stopped: false,
            max_amount: request.max_amount,
            last_payment_amount: request.amount,
            signature: request.signature.clone(),
            billing,
            created_at: now,
        };
        gas.charge(GasOp::StorageCreate);
        self.subscriptions.insert(request.id, subscription.clone());

        tracing::info!(
            id = %request.id,
            payer = %request.payer,
            merchant = %request.merchant,
            unit = %unit,
            reserved,
            ?billing,
            "Authorization created"
        );

        Ok(Created {
            subscription,
            unit,
            reserved,
        })
    }

    /// Settle one due payment
    pub fn execute<A: AssetBook>(
        &mut self,
        assets: &mut A,
        gas: &mut GasMeter,
        request: &ExecuteSubscription,
        billing: BillingMode,
        operator: &Address,
        now: DateTime<Utc>,
    ) -> Result<Executed> {
        gas.charge(GasOp::StorageRead);
        let subscription = self.active(&request.id)?;
        if subscription.billing != billing {
            return Err(Error::BillingModeMismatch(request.id));
        }
        if now < subscription.next_due {
            return Err(Error::PaymentNotDueYet(subscription.next_due));
        }
        if request.amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if request.amount >= subscription.max_amount {
            return Err(Error::MaxAmountExceeded {
                amount: request.amount,
                max_amount: subscription.max_amount,
            });
        }

        let signer = subscription.signer;
        let signature = subscription.signature.clone();
        let message = TypedMessage::CreateAuthorization {
            merchant: request.merchant,
            asset: request.asset,
            frequency_secs: frequency_secs(request.frequency)?,
            id: request.id,
            organization: request.org_fee.organization,
        };
        self.verify(gas, &message, &signer, &signature)?;

        if request.payer != signer {
            return Err(Error::InvalidSigner(request.payer));
        }

        gas.charge(GasOp::StorageRead);
        let remaining = self.ledger.remaining(&request.payer, &request.id)?;
        if remaining <= request.amount {
            return Err(Error::InsufficientAllowance(format!(
                "remaining reservation {} must exceed amount {}",
                remaining, request.amount
            )));
        }

        let split = self.fees.split(request.amount, request.fee_bps, &request.org_fee)?;

        gas.charge(GasOp::StorageWrite);
        gas.charge(GasOp::AssetTransfer);
        if !self
            .ledger
            .fetch_funds(assets, &request.payer, &request.id, request.amount)
        {
            return Err(Error::TransferFailed(format!(
                "reservation debit of {} failed",
                request.amount
            )));
        }

        for (recipient, amount) in [
            (*operator, split.owner_fee),
            (request.org_fee.organization, split.org_fee),
            (request.merchant, split.merchant_amount),
        ] {
            if amount > 0 {
                gas.charge(GasOp::AssetTransfer);
                self.ledger.transfer_out(assets, &request.asset, &recipient, amount)?;
            }
        }

        let grace = self.grace_period;
        gas.charge(GasOp::StorageWrite);
        let subscription = self.active_mut(&request.id)?;
        subscription.last_payment_amount = request.amount;
        let finalize = match billing {
            BillingMode::Regular => {
                // Fixed grid: late execution does not shift later due dates
                subscription.next_due = shift(subscription.next_due, request.frequency)?;
                false
            }
            BillingMode::UsageBased => {
                subscription.next_due = shift(now, request.frequency - grace)?;
                subscription.stopped
            }
        };
        let next_due = subscription.next_due;

        if finalize {
            gas.charge(GasOp::StorageClear);
            self.ledger.cancel_stream(&request.payer, &request.id)?;
            self.subscriptions.remove(&request.id);
            tracing::info!(id = %request.id, "Stopped usage-based authorization finalized");
        }

        tracing::info!(
            id = %request.id,
            amount = request.amount,
            owner_fee = split.owner_fee,
            org_fee = split.org_fee,
            merchant_amount = split.merchant_amount,
            "Payment executed"
        );

        Ok(Executed {
            split,
            next_due: (!finalize).then_some(next_due),
        })
    }

    /// Cancel with the payer's signature
    ///
    /// Returns `None` when the authorization is already inactive.
    pub fn cancel(
        &mut self,
        gas: &mut GasMeter,
        id: &Uuid,
        signature: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        gas.charge(GasOp::StorageRead);
        let subscription = match self.subscriptions.get(id) {
            Some(s) if s.active => s,
            _ => return Ok(None),
        };
        let signer = subscription.signer;
        let next_due = subscription.next_due;

        self.verify(gas, &TypedMessage::CancelAuthorization { id: *id }, &signer, signature)?;
        if now > next_due {
            return Err(Error::PaymentOutstanding(next_due));
        }

        self.remove(gas, id, &signer).map(Some)
    }

    /// Privileged cancel without signature or due-date checks
    pub fn force_cancel(&mut self, gas: &mut GasMeter, id: &Uuid) -> Result<Option<Subscription>> {
        gas.charge(GasOp::StorageRead);
        let signer = match self.subscriptions.get(id) {
            Some(s) if s.active => s.signer,
            _ => return Ok(None),
        };
        self.remove(gas, id, &signer).map(Some)
    }

    fn remove(&mut self, gas: &mut GasMeter, id: &Uuid, signer: &Address) -> Result<Subscription> {
        gas.charge(GasOp::StorageClear);
        gas.charge(GasOp::StorageClear);
        self.ledger.cancel_stream(signer, id)?;

        gas.charge(GasOp::StorageClear);
        let mut subscription = self
            .subscriptions
            .remove(id)
            .ok_or(Error::SubscriptionNotActive(*id))?;
        subscription.active = false;

        tracing::info!(id = %id, payer = %signer, "Authorization cancelled");
        Ok(subscription)
    }

    /// Mark a usage-based authorization final; the next execution deletes it
    pub fn stop_usage_based(&mut self, gas: &mut GasMeter, id: &Uuid, signature: &[u8]) -> Result<()> {
        gas.charge(GasOp::StorageRead);
        let subscription = self.active(id)?;
        if !subscription.is_usage_based() {
            return Err(Error::BillingModeMismatch(*id));
        }
        let signer = subscription.signer;

        self.verify(gas, &TypedMessage::CancelAuthorization { id: *id }, &signer, signature)?;

        gas.charge(GasOp::StorageWrite);
        self.active_mut(id)?.stopped = true;
        tracing::info!(id = %id, "Usage-based authorization stopped");
        Ok(())
    }

    /// Change the per-payment ceiling
    pub fn update_max_amount(
        &mut self,
        gas: &mut GasMeter,
        id: &Uuid,
        new_max_amount: Amount,
        signature: &[u8],
    ) -> Result<()> {
        gas.charge(GasOp::StorageRead);
        let subscription = self.active(id)?;
        let signer = subscription.signer;
        let floor = subscription.last_payment_amount;

        let message = TypedMessage::UpdateMaxAmount {
            id: *id,
            new_max_amount,
        };
        self.verify(gas, &message, &signer, signature)?;
        if new_max_amount <= floor {
            return Err(Error::InvalidMaxAmount {
                max_amount: new_max_amount,
                floor,
            });
        }

        gas.charge(GasOp::StorageWrite);
        self.active_mut(id)?.max_amount = new_max_amount;
        tracing::info!(id = %id, new_max_amount, "Max amount updated");
        Ok(())
    }

    /// Raise the reservation ceiling
    ///
    /// Authorized by the delegated proof (or the raised allowance) alone; no
    /// typed signature over the new amount is checked.
    pub fn increase_allowance<A: AssetBook>(
        &mut self,
        assets: &mut A,
        gas: &mut GasMeter,
        id: &Uuid,
        payer: &Address,
        proof: &ReservationProof,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        gas.charge(GasOp::StorageRead);
        let subscription = self.active(id)?;
        if subscription.signer != *payer {
            return Err(Error::InvalidSigner(*payer));
        }

        if proof.is_delegated() {
            gas.charge(GasOp::AssetPermit);
        }
        gas.charge(GasOp::StorageWrite);
        let amount = self
            .ledger
            .increase_reservation(assets, payer, id, proof, now)?;

        tracing::info!(id = %id, payer = %payer, amount, "Reservation increased");
        Ok(amount)
    }
}

/// Signed frequency; only whole seconds are signable
fn frequency_secs(frequency: Duration) -> Result<u64> {
    if frequency.subsec_nanos() != 0 {
        return Err(Error::InvalidFrequency(frequency.num_seconds()));
    }
    u64::try_from(frequency.num_seconds()).map_err(|_| Error::InvalidFrequency(frequency.num_seconds()))
}

fn shift(from: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    from.checked_add_signed(by).ok_or(Error::ArithmeticOverflow)
}
