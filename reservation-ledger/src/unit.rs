//! Allocation units
//!
//! An allocation unit is the spender identity a payer approves. Holding at most
//! one slot per (payer, asset) pair per unit keeps two authorizations for the
//! same pair from overwriting each other's allowance.

use crate::asset::AssetBook;
use crate::types::{Address, Amount, AssetId, ReservationProof, ReservationSlot, UnitId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Isolated reservation container owned by exactly one factory
#[derive(Debug, Clone)]
pub struct AllocationUnit {
    id: UnitId,
    address: Address,
    factory: Address,
    slots: HashMap<(Address, AssetId), ReservationSlot>,
}

impl AllocationUnit {
    /// Construct a unit bound to its owning factory
    ///
    /// The factory identity is fixed for the unit's lifetime.
    pub fn new(id: UnitId, factory: Address) -> Result<Self> {
        if id.is_uninitialized() {
            return Err(Error::UnitNotFound(id));
        }
        if factory.is_zero() {
            return Err(Error::InvalidAddress("factory is null".to_string()));
        }

        Ok(Self {
            id,
            address: Address::derive(&factory, &id.get().to_be_bytes()),
            factory,
            slots: HashMap::new(),
        })
    }

    /// Unit id
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Spender identity payers approve
    pub fn address(&self) -> Address {
        self.address
    }

    /// Owning factory (also the custody identity debits are pulled into)
    pub fn factory(&self) -> Address {
        self.factory
    }

    /// Slot for (payer, asset)
    pub fn slot(&self, payer: &Address, asset: &AssetId) -> Option<&ReservationSlot> {
        self.slots.get(&(*payer, *asset))
    }

    /// True if a slot exists for (payer, asset)
    pub fn has_slot(&self, payer: &Address, asset: &AssetId) -> bool {
        self.slots.contains_key(&(*payer, *asset))
    }

    /// Number of live slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Ceiling minus usage; zero when no slot exists
    pub fn remaining(&self, payer: &Address, asset: &AssetId) -> Amount {
        self.slot(payer, asset).map(|s| s.remaining()).unwrap_or(0)
    }

    /// Create the slot for (payer, asset)
    ///
    /// In delegated mode the proof is applied and its value becomes the ceiling.
    /// Otherwise the allowance the payer already granted to this unit is used.
    pub fn reserve<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        asset: &AssetId,
        proof: &ReservationProof,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        if self.has_slot(payer, asset) {
            return Err(Error::SlotExists {
                unit: self.id,
                payer: *payer,
                asset: *asset,
            });
        }

        let amount = self.authorize(assets, payer, asset, proof, now, 0)?;
        self.slots
            .insert((*payer, *asset), ReservationSlot::new(amount));

        tracing::debug!(unit = %self.id, payer = %payer, asset = %asset, amount, "Reservation created");
        Ok(amount)
    }

    /// Raise the ceiling of an existing slot and reset its usage
    pub fn update<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        asset: &AssetId,
        proof: &ReservationProof,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        let current = self
            .slot(payer, asset)
            .map(|s| s.amount)
            .ok_or(Error::SlotNotFound {
                unit: self.id,
                payer: *payer,
                asset: *asset,
            })?;

        let amount = self.authorize(assets, payer, asset, proof, now, current)?;
        self.slots
            .insert((*payer, *asset), ReservationSlot::new(amount));

        tracing::debug!(unit = %self.id, payer = %payer, asset = %asset, amount, "Reservation updated");
        Ok(amount)
    }

    /// Consume `amount` of the slot and pull it into the factory's custody
    ///
    /// Fails without mutation when usage would exceed the ceiling.
    pub fn debit<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }

        let key = (*payer, *asset);
        let slot = self.slots.get(&key).copied().ok_or(Error::SlotNotFound {
            unit: self.id,
            payer: *payer,
            asset: *asset,
        })?;

        let new_used = slot
            .used_amount
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        if new_used > slot.amount {
            return Err(Error::ReservationExceeded {
                requested: amount,
                remaining: slot.remaining(),
            });
        }

        assets.transfer_from(asset, &self.address, payer, &self.factory, amount)?;

        if let Some(slot) = self.slots.get_mut(&key) {
            slot.used_amount = new_used;
        }
        Ok(())
    }

    /// Delete the slot for (payer, asset); no-op when absent
    pub fn release(&mut self, payer: &Address, asset: &AssetId) -> bool {
        self.slots.remove(&(*payer, *asset)).is_some()
    }

    /// Resolve the ceiling a proof grants, requiring it to exceed `floor`
    fn authorize<A: AssetBook>(
        &self,
        assets: &mut A,
        payer: &Address,
        asset: &AssetId,
        proof: &ReservationProof,
        now: DateTime<Utc>,
        floor: Amount,
    ) -> Result<Amount> {
        let amount = match proof {
            ReservationProof::Delegated(delegated) => delegated.value,
            ReservationProof::ExistingAllowance => assets.allowance(asset, payer, &self.address),
        };

        if amount == 0 {
            return Err(Error::InsufficientAllowance(format!(
                "no allowance granted to {}",
                self.address
            )));
        }
        if amount <= floor {
            return Err(Error::AllowanceNotIncreased {
                current: floor,
                requested: amount,
            });
        }

        if let ReservationProof::Delegated(delegated) = proof {
            assets.permit(asset, payer, &self.address, delegated, now)?;
        }
        Ok(amount)
    }
}
