//! Error taxonomy for the exchange core.
//!
//! Caller errors (`InvalidOrder`, `InsufficientFunds`, `OrderNotFound`, ...) are
//! returned before any state is touched. `InvariantViolation` means the ledger or a
//! book is inconsistent; it is logged where detected and must never be retried.

use thiserror::Error;

use crate::types::{AccountId, OrderId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds for {account} in {instrument}: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        instrument: String,
        required: String,
        available: String,
    },

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("unknown market: {0}")]
    UnknownMarket(String),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// True for errors that indicate corrupted state rather than a bad request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "invariant violation");
        Error::InvariantViolation(message)
    }
}

/// Failure converting raw input into an instrument quantity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("malformed number {0:?}")]
    Malformed(String),

    #[error("non-finite number {0}")]
    NonFinite(String),

    #[error("number out of range: {0}")]
    OutOfRange(String),
}
