//! Error types for the reservation ledger

use crate::asset::AssetError;
use crate::types::{Address, Amount, UnitId};
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null or otherwise unusable identity
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Zero amount where a positive amount is required
    #[error("Amount must be positive")]
    ZeroAmount,

    /// A slot already exists for this (payer, asset) pair in the unit
    #[error("Reservation already exists for payer {payer} and asset {asset} in {unit}")]
    SlotExists {
        /// Unit holding the slot
        unit: UnitId,
        /// Payer
        payer: Address,
        /// Asset
        asset: Address,
    },

    /// No slot for this (payer, asset) pair in the unit
    #[error("No reservation for payer {payer} and asset {asset} in {unit}")]
    SlotNotFound {
        /// Unit searched
        unit: UnitId,
        /// Payer
        payer: Address,
        /// Asset
        asset: Address,
    },

    /// Reservation update must strictly raise the ceiling
    #[error("Reservation not increased: current {current}, requested {requested}")]
    AllowanceNotIncreased {
        /// Current ceiling
        current: Amount,
        /// Requested ceiling
        requested: Amount,
    },

    /// Debit would push usage past the ceiling
    #[error("Reservation exceeded: requested {requested}, remaining {remaining}")]
    ReservationExceeded {
        /// Requested debit
        requested: Amount,
        /// Remaining before the debit
        remaining: Amount,
    },

    /// Allowance backing a reservation is too small
    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    /// Stream already registered for (payer, id)
    #[error("Stream already exists for payer {payer}, authorization {id}")]
    StreamExists {
        /// Payer
        payer: Address,
        /// Authorization id
        id: Uuid,
    },

    /// No active stream for (payer, id)
    #[error("Stream not active for payer {payer}, authorization {id}")]
    StreamNotActive {
        /// Payer
        payer: Address,
        /// Authorization id
        id: Uuid,
    },

    /// Unit id does not name a registered unit
    #[error("Allocation unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Unit was constructed for another factory
    #[error("Allocation unit {unit} belongs to factory {factory}")]
    ForeignUnit {
        /// Offending unit
        unit: UnitId,
        /// Factory the unit claims
        factory: Address,
    },

    /// Signature bytes could not be decoded
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Asset collaborator rejected an operation
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Canonical encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checked arithmetic overflowed
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
