//! Core types for the reservation ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode) so they can be signed
//! - Exact integer arithmetic in the asset's base unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in the asset's smallest base unit
pub type Amount = u128;

/// 20-byte identity of a payer, merchant, organization, asset or ledger component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The null identity
    pub const ZERO: Address = Address([0u8; 20]);

    /// Pseudo-asset naming the ledger's native currency
    pub const NATIVE: Address = Address([0xEE; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// True for the null identity
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Derive the identity controlled by an Ed25519 public key
    ///
    /// Last 20 bytes of `blake3(public_key)`.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let hash = blake3::hash(public_key);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[12..]);
        Self(bytes)
    }

    /// Derive a child identity from a parent identity and a label
    ///
    /// Used for component identities (registries, allocation units) that never sign.
    pub fn derive(parent: &Address, label: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&parent.0);
        hasher.update(label);
        let hash = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[12..]);
        Self(bytes)
    }

    /// Parse from hex (with or without `0x`)
    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s.trim_start_matches("0x")).ok()?;
        let bytes: [u8; 20] = raw.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Asset identifier (the asset's own address)
pub type AssetId = Address;

/// Sequential allocation unit identifier
///
/// Ids start at 1. `UnitId::UNINITIALIZED` (0) never names a registered unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Sentinel for "no unit assigned yet"
    pub const UNINITIALIZED: UnitId = UnitId(0);

    /// Create from raw value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn get(&self) -> u64 {
        self.0
    }

    /// True for the sentinel
    pub fn is_uninitialized(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Bounded pre-authorization held by one allocation unit for one (payer, asset) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSlot {
    /// Ceiling
    pub amount: Amount,

    /// Consumed so far (never exceeds `amount`)
    pub used_amount: Amount,
}

impl ReservationSlot {
    /// Fresh slot with nothing consumed
    pub fn new(amount: Amount) -> Self {
        Self {
            amount,
            used_amount: 0,
        }
    }

    /// Amount still available
    pub fn remaining(&self) -> Amount {
        self.amount - self.used_amount
    }
}

/// Back-reference from an authorization to the unit backing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Allocation unit holding the reservation slot
    pub unit: UnitId,

    /// Asset being reserved
    pub asset: AssetId,

    /// Active flag
    pub active: bool,

    /// Whether the reservation was established with a delegated-transfer proof
    pub delegated_proof_mode: bool,
}

/// Off-channel signed approval standing in for a separate approval step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedProof {
    /// Approved amount
    pub value: Amount,

    /// Owner's permit nonce at signing time
    pub nonce: u64,

    /// Proof is rejected after this instant
    pub deadline: DateTime<Utc>,

    /// Typed-data signature over the permit
    pub signature: Vec<u8>,
}

/// How a reservation is established or raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationProof {
    /// Apply a delegated-transfer proof; the reserved amount is the proof's value
    Delegated(DelegatedProof),

    /// Rely on an allowance the payer already granted to the unit
    ExistingAllowance,
}

impl ReservationProof {
    /// True for delegated mode
    pub fn is_delegated(&self) -> bool {
        matches!(self, ReservationProof::Delegated(_))
    }
}
