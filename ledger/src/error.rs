//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Currency, PayoutMethod};

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// The taxonomy is closed on purpose: callers can exhaustively match and
/// decide per variant whether to display, retry, or escalate.
#[derive(Error, Debug)]
pub enum Error {
    /// Wallet or transaction not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Committing the delta would drive the wallet balance negative
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the rejected commit
        available: Decimal,
        /// Magnitude of the rejected debit
        requested: Decimal,
    },

    /// Amount is below the configured or method-specific minimum
    #[error("Amount {amount} is below the minimum of {minimum}")]
    BelowMinimum {
        /// Applicable minimum
        minimum: Decimal,
        /// Offered amount
        amount: Decimal,
    },

    /// Deposit event reference does not resolve to a registered owner
    #[error("Unresolved recipient: {0}")]
    UnresolvedRecipient(String),

    /// Attempt to commit or fail a transaction that is already terminal.
    /// Signals a programming error in the caller, not a business failure.
    #[error("Transaction {0} is already terminal")]
    AlreadyTerminal(Uuid),

    /// Provider payment id was already processed
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// Transient storage failure; safe to retry with backoff
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Webhook signature/authenticity check failed
    #[error("Unverified event: {0}")]
    UnverifiedEvent(String),

    /// Malformed or invalid input (amount, payload, payout details)
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Payout method is not offered for the wallet currency
    #[error("Payout method {method} is not available for {currency}")]
    MethodUnavailable {
        /// Requested payout method
        method: PayoutMethod,
        /// Wallet currency
        currency: Currency,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error is transient and worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}
