use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::keystore::KeystoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Collision(String),
    #[error("Integrity check failed: MAC mismatch")]
    Integrity,
    #[error("Malformed data: {0}")]
    Structural(String),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Io(String),
    #[error("No validators available")]
    NoValidators,
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Reasons a transaction, stake or block is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("sender and recipient cannot be the same")]
    SelfTransfer,
    #[error("amount must be greater than 0")]
    NonPositiveAmount,
    #[error("balance cannot be negative")]
    NegativeBalance,
    #[error("insufficient {currency} balance: have {available}, need {required}")]
    InsufficientBalance {
        currency: String,
        available: Decimal,
        required: Decimal,
    },
    #[error("invalid signature")]
    BadSignature,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("private key does not match the account address")]
    KeyMismatch,
    #[error("block contains no transactions")]
    EmptyBlock,
    #[error("amount overflows the representable range")]
    AmountOverflow,
}

impl From<KeystoreError> for LedgerError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::Integrity => LedgerError::Integrity,
            e @ (KeystoreError::Random(_) | KeystoreError::Cipher(_)) => {
                LedgerError::Crypto(e.to_string())
            }
            other => LedgerError::Structural(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Structural(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        LedgerError::Io(format!("lock poisoned: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
