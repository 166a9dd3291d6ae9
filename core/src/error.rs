//! Shared error taxonomy for the relayer core.

use serde::Serialize;
use std::fmt;

/// Errors raised while validating a candidate transfer.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(crate = "serde")]
pub struct ValidationError {
    /// Machine-readable reason, e.g. `"nonce_used"`, `"deadline_expired"`.
    pub invalid_reason: String,
    /// Human-readable detail.
    pub invalid_message: Option<String>,
    /// Whether this failure is retryable or terminal.
    pub retryable: bool,
}

impl ValidationError {
    /// Creates a new, by-default non-retryable validation error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            invalid_reason: reason.into(),
            invalid_message: None,
            retryable: false,
        }
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.invalid_message = Some(message.into());
        self
    }

    /// Marks this failure as transient/retryable (e.g. an oracle read failure).
    #[must_use]
    pub const fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.invalid_message {
            Some(msg) => write!(f, "{}: {msg}", self.invalid_reason),
            None => write!(f, "{}", self.invalid_reason),
        }
    }
}

/// Failure to read state from the chain oracle (nonce/balance/lockout/gas views).
#[derive(Debug, Clone, thiserror::Error)]
#[error("chain oracle read failed: {0}")]
pub struct ChainOracleError(pub String);

/// Top-level error for relayer operations that span validation and oracle access.
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    /// A validation check failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The chain oracle could not be reached or returned malformed data.
    #[error(transparent)]
    Oracle(#[from] ChainOracleError),
}

impl RelayerError {
    /// Whether the caller should retry this operation after a delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(v) => v.retryable,
            Self::Oracle(_) => true,
        }
    }
}
