//! Errors surfaced by the chain gateway.

use alloy_provider::PendingTransactionError;
use alloy_transport::TransportError;

/// Errors from submitting an escrow transaction and awaiting its receipt.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// RPC transport or transaction submission failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Failure while awaiting the transaction receipt (timeout, dropped, etc.).
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),

    /// The transaction was mined but reverted.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    /// A contract call (view or write) returned a decode error.
    #[error("contract call failed: {0}")]
    Contract(#[from] alloy_contract::Error),

    /// Configuration or setup failure (bad URL, bad address) that cannot be retried.
    #[error("{0}")]
    Custom(String),
}

impl SubmissionError {
    /// Whether resubmission might succeed (infrastructure-level failure) as opposed to a
    /// deterministic on-chain rejection.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reverted(_) | Self::Custom(_) => false,
            Self::Transport(_) | Self::PendingTransaction(_) => true,
            Self::Contract(_) => {
                let msg = self.to_string().to_lowercase();
                ["timeout", "connection refused", "network error", "nonce too low", "replacement transaction underpriced", "insufficient funds for gas"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
        }
    }
}
