//! Error types for ledger operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing previous transaction: {0}")]
    MissingPreviousTransaction(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Storage fault: {0}")]
    StorageFault(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("UTXO index out of sync: index at {index_tip}, expected {expected}")]
    IndexOutOfSync { index_tip: String, expected: String },

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("Block rejected by stake gate: stake {stake}")]
    StakeRejected { stake: i64 },

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl LedgerError {
    /// True for the recoverable "referenced thing is absent" class.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_) | LedgerError::MissingPreviousTransaction(_)
        )
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::StorageFault(err.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::StorageFault(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
