//! Unified error types for the ledger library

use thiserror::Error;

/// Main error type for the ledger library
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A byte buffer did not match the declared layout of a wire field.
    #[error("decode error in {field}: {reason}")]
    Decode { field: &'static str, reason: String },

    /// A known scope gap (64-bit VarInt, SegWit, unknown version), not corrupted data.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn decode(field: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Decode {
            field,
            reason: reason.into(),
        }
    }

    /// True for errors that describe a deliberate scope gap rather than bad input.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, LedgerError::Unsupported(_))
    }
}

impl From<hex::FromHexError> for LedgerError {
    fn from(e: hex::FromHexError) -> Self {
        LedgerError::InvalidFormat(e.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LedgerError>;
