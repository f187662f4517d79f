//! Reservation registry
//!
//! Factory and arena for allocation units plus the stream table mapping
//! (payer, authorization id) to the unit backing it.
//!
//! # Example
//!
//! ```no_run
//! use reservation_ledger::{Address, MemoryAssetBook, ReservationProof, ReservationRegistry};
//! use uuid::Uuid;
//!
//! # fn main() -> reservation_ledger::Result<()> {
//! let mut registry = ReservationRegistry::new(Address::from_bytes([0xFA; 20]))?;
//! let mut assets = MemoryAssetBook::new(1);
//! let payer = Address::from_bytes([1; 20]);
//! let token = Address::from_bytes([0xAA; 20]);
//!
//! let unit = match registry.available_unit(&payer, &token) {
//!     Some(unit) => unit,
//!     None => registry.new_unit()?,
//! };
//! registry.create_stream(
//!     &mut assets,
//!     &payer,
//!     Uuid::new_v4(),
//!     &token,
//!     unit,
//!     &ReservationProof::ExistingAllowance,
//!     chrono::Utc::now(),
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::asset::AssetBook;
use crate::types::{Address, Amount, AssetId, ReservationProof, StreamRecord, UnitId};
use crate::unit::AllocationUnit;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Owner of all allocation units and stream records
#[derive(Debug, Clone)]
pub struct ReservationRegistry {
    /// Factory identity; also holds debited funds until they are paid out
    address: Address,

    /// Units indexed by `id - 1`
    units: Vec<AllocationUnit>,

    /// (payer, authorization id) -> backing unit
    streams: HashMap<(Address, Uuid), StreamRecord>,
}

impl ReservationRegistry {
    /// Create an empty registry
    pub fn new(address: Address) -> Result<Self> {
        if address.is_zero() {
            return Err(Error::InvalidAddress("registry address is null".to_string()));
        }
        Ok(Self {
            address,
            units: Vec::new(),
            streams: HashMap::new(),
        })
    }

    /// Factory / custody identity
    pub fn address(&self) -> Address {
        self.address
    }

    /// Number of units created so far
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Allocate and register a unit with the next sequential id (first id is 1)
    pub fn new_unit(&mut self) -> Result<UnitId> {
        let id = UnitId::new(self.units.len() as u64 + 1);
        let unit = AllocationUnit::new(id, self.address)?;
        self.units.push(unit);

        tracing::info!(unit = %id, factory = %self.address, "Allocation unit created");
        Ok(id)
    }

    /// Adopt a unit constructed elsewhere (e.g. restored from a snapshot)
    ///
    /// The unit must name this registry as its factory and carry the next id.
    pub fn register_unit(&mut self, unit: AllocationUnit) -> Result<UnitId> {
        if unit.factory() != self.address {
            return Err(Error::ForeignUnit {
                unit: unit.id(),
                factory: unit.factory(),
            });
        }
        let expected = UnitId::new(self.units.len() as u64 + 1);
        if unit.id() != expected {
            return Err(Error::UnitNotFound(unit.id()));
        }

        let id = unit.id();
        self.units.push(unit);
        Ok(id)
    }

    /// Unit by id
    pub fn unit(&self, id: UnitId) -> Result<&AllocationUnit> {
        self.index(id)
            .and_then(|i| self.units.get(i))
            .ok_or(Error::UnitNotFound(id))
    }

    fn unit_mut(&mut self, id: UnitId) -> Result<&mut AllocationUnit> {
        self.index(id)
            .and_then(|i| self.units.get_mut(i))
            .ok_or(Error::UnitNotFound(id))
    }

    fn index(&self, id: UnitId) -> Option<usize> {
        if id.is_uninitialized() {
            None
        } else {
            Some(id.get() as usize - 1)
        }
    }

    /// Stream record for (payer, id)
    pub fn stream(&self, payer: &Address, id: &Uuid) -> Option<&StreamRecord> {
        self.streams.get(&(*payer, *id))
    }

    fn active_stream(&self, payer: &Address, id: &Uuid) -> Result<StreamRecord> {
        self.stream(payer, id)
            .filter(|record| record.active)
            .copied()
            .ok_or(Error::StreamNotActive {
                payer: *payer,
                id: *id,
            })
    }

    /// First unit with no slot for (payer, asset), or `None` when every unit is in use
    pub fn available_unit(&self, payer: &Address, asset: &AssetId) -> Option<UnitId> {
        self.units
            .iter()
            .find(|unit| !unit.has_slot(payer, asset))
            .map(|unit| unit.id())
    }

    /// Unit backing (payer, id)
    pub fn current_unit(&self, payer: &Address, id: &Uuid) -> Option<UnitId> {
        self.stream(payer, id).map(|record| record.unit)
    }

    /// Register a stream and reserve its slot in `unit`
    ///
    /// Returns the reserved ceiling.
    #[allow(clippy::too_many_arguments)]
    pub fn create_stream<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        id: Uuid,
        asset: &AssetId,
        unit: UnitId,
        proof: &ReservationProof,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        if payer.is_zero() {
            return Err(Error::InvalidAddress("payer is null".to_string()));
        }
        if asset.is_zero() {
            return Err(Error::InvalidAddress("asset is null".to_string()));
        }
        if unit.is_uninitialized() {
            return Err(Error::InvalidAddress("allocation unit is uninitialized".to_string()));
        }
        if self.streams.contains_key(&(*payer, id)) {
            return Err(Error::StreamExists { payer: *payer, id });
        }

        let factory = self.address;
        let target = self.unit_mut(unit)?;
        if target.factory() != factory {
            return Err(Error::ForeignUnit {
                unit,
                factory: target.factory(),
            });
        }

        let amount = target.reserve(assets, payer, asset, proof, now)?;
        self.streams.insert(
            (*payer, id),
            StreamRecord {
                unit,
                asset: *asset,
                active: true,
                delegated_proof_mode: proof.is_delegated(),
            },
        );

        tracing::info!(payer = %payer, id = %id, unit = %unit, amount, "Stream created");
        Ok(amount)
    }

    /// Debit the stream's slot, reporting any failure as `false`
    pub fn fetch_funds<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        id: &Uuid,
        amount: Amount,
    ) -> bool {
        let result = self.active_stream(payer, id).and_then(|record| {
            self.unit_mut(record.unit)?
                .debit(assets, payer, &record.asset, amount)
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(payer = %payer, id = %id, amount, error = %e, "Fund pull failed");
                false
            }
        }
    }

    /// Pay previously debited funds out of custody
    pub fn transfer_out<A: AssetBook>(
        &mut self,
        assets: &mut A,
        asset: &AssetId,
        to: &Address,
        amount: Amount,
    ) -> Result<()> {
        if to.is_zero() {
            return Err(Error::InvalidAddress("recipient is null".to_string()));
        }
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        assets.transfer(asset, &self.address, to, amount)?;
        Ok(())
    }

    /// Raise the stream's reservation ceiling
    pub fn increase_reservation<A: AssetBook>(
        &mut self,
        assets: &mut A,
        payer: &Address,
        id: &Uuid,
        proof: &ReservationProof,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        let record = self.active_stream(payer, id)?;
        let amount = self
            .unit_mut(record.unit)?
            .update(assets, payer, &record.asset, proof, now)?;

        if let Some(stored) = self.streams.get_mut(&(*payer, *id)) {
            stored.delegated_proof_mode = proof.is_delegated();
        }
        Ok(amount)
    }

    /// Reservation left for (payer, id)
    pub fn remaining(&self, payer: &Address, id: &Uuid) -> Result<Amount> {
        let record = self.active_stream(payer, id)?;
        Ok(self.unit(record.unit)?.remaining(payer, &record.asset))
    }

    /// Release the stream's slot and delete its record
    pub fn cancel_stream(&mut self, payer: &Address, id: &Uuid) -> Result<()> {
        let record = self.active_stream(payer, id)?;
        self.unit_mut(record.unit)?.release(payer, &record.asset);
        self.streams.remove(&(*payer, *id));

        tracing::info!(payer = %payer, id = %id, unit = %record.unit, "Stream cancelled");
        Ok(())
    }
}
