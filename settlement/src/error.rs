//! Error types for the settlement engine

use chrono::{DateTime, Utc};
use reservation_ledger::{Address, Amount};
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classes, used for metrics labels and operator triage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input
    Validation,
    /// Bad or missing signature / caller
    Authorization,
    /// Operation not allowed in the current state
    State,
    /// Allowance or transfer shortfall
    Resource,
    /// Configuration, arithmetic or infrastructure failure
    Internal,
}

impl ErrorCategory {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::State => "state",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Settlement errors
///
/// Every variant aborts the whole call with no partial mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null or unusable identity
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Zero amount where a positive amount is required
    #[error("Amount must be positive")]
    ZeroAmount,

    /// Fee above MAX_FEE_BPS
    #[error("Invalid fee percentage: {0} bps")]
    InvalidFeePercentage(u16),

    /// Billing period below MIN_FREQUENCY
    #[error("Invalid frequency: {0}s")]
    InvalidFrequency(i64),

    /// Ceiling does not exceed the amount it must cover
    #[error("Invalid max amount {max_amount}: must exceed {floor}")]
    InvalidMaxAmount {
        /// Proposed ceiling
        max_amount: Amount,
        /// Value it must exceed
        floor: Amount,
    },

    /// Gas price or token price not strictly positive
    #[error("Gas price and token price must be positive")]
    InvalidGasPricing,

    /// Recovered signer does not match
    #[error("Invalid signature")]
    InvalidSignature,

    /// Payer is not the authorization's signer
    #[error("Invalid signer: {0}")]
    InvalidSigner(Address),

    /// Signature bytes could not be decoded
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Caller lacks the privilege the entry point requires
    #[error("Unauthorized caller: {0}")]
    Unauthorized(Address),

    /// Entry point invoked from within a call on the same thread
    #[error("Re-entrant call rejected")]
    ReentrantCall,

    /// No active authorization with this id
    #[error("Subscription not active: {0}")]
    SubscriptionNotActive(Uuid),

    /// Active authorization with this id already exists
    #[error("Subscription already exists: {0}")]
    SubscriptionAlreadyExists(Uuid),

    /// Execution attempted before the due date
    #[error("Payment not due until {0}")]
    PaymentNotDueYet(DateTime<Utc>),

    /// Cancellation attempted with a payment already due
    #[error("Payment outstanding since {0}")]
    PaymentOutstanding(DateTime<Utc>),

    /// Amount reaches the authorization's ceiling
    #[error("Max amount exceeded: {amount} against ceiling {max_amount}")]
    MaxAmountExceeded {
        /// Requested amount
        amount: Amount,
        /// Ceiling
        max_amount: Amount,
    },

    /// Regular entry point used on a usage-based authorization or vice versa
    #[error("Billing mode mismatch for subscription {0}")]
    BillingModeMismatch(Uuid),

    /// Reservation or allowance too small
    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    /// Asset pull or payout failed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Other ledger failure
    #[error("Ledger error: {0}")]
    Ledger(reservation_ledger::Error),

    /// Checked arithmetic overflowed
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Actor mailbox closed or similar
    #[error("Concurrency error: {0}")]
    Concurrency(String),
}

impl Error {
    /// Error class
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidAddress(_)
            | Error::ZeroAmount
            | Error::InvalidFeePercentage(_)
            | Error::InvalidFrequency(_)
            | Error::InvalidMaxAmount { .. }
            | Error::InvalidGasPricing => ErrorCategory::Validation,
            Error::InvalidSignature
            | Error::InvalidSigner(_)
            | Error::MalformedSignature(_)
            | Error::Unauthorized(_)
            | Error::ReentrantCall => ErrorCategory::Authorization,
            Error::SubscriptionNotActive(_)
            | Error::SubscriptionAlreadyExists(_)
            | Error::PaymentNotDueYet(_)
            | Error::PaymentOutstanding(_)
            | Error::MaxAmountExceeded { .. }
            | Error::BillingModeMismatch(_) => ErrorCategory::State,
            Error::InsufficientAllowance(_) | Error::TransferFailed(_) => ErrorCategory::Resource,
            Error::Ledger(_) | Error::ArithmeticOverflow | Error::Config(_) | Error::Concurrency(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<reservation_ledger::Error> for Error {
    fn from(err: reservation_ledger::Error) -> Self {
        use reservation_ledger::Error as LedgerError;

        match err {
            LedgerError::InvalidAddress(msg) => Error::InvalidAddress(msg),
            LedgerError::ZeroAmount => Error::ZeroAmount,
            LedgerError::MalformedSignature(msg) => Error::MalformedSignature(msg),
            LedgerError::ArithmeticOverflow => Error::ArithmeticOverflow,
            LedgerError::InsufficientAllowance(msg) => Error::InsufficientAllowance(msg),
            e @ (LedgerError::AllowanceNotIncreased { .. } | LedgerError::ReservationExceeded { .. }) => {
                Error::InsufficientAllowance(e.to_string())
            }
            LedgerError::Asset(e) => Error::TransferFailed(e.to_string()),
            other => Error::Ledger(other),
        }
    }
}
