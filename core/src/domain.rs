//! The transfer data model and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`SignedTransfer`].
///
/// Transitions: `Received -> Validated -> Pending -> Confirmed` (terminal), with a
/// `Failed <-> Validated` retry cycle bounded by a maximum retry count, and a
/// `PermanentlyFailed` terminal branch for non-recoverable errors (expired deadline,
/// a nonce already consumed on-chain by a different transfer, an on-chain revert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Persisted at ingest, before validation has run.
    Received,
    /// Passed all validator checks; eligible for execution.
    Validated,
    /// Broadcast on-chain; awaiting a receipt.
    Pending,
    /// Receipt observed with success status. Terminal.
    Confirmed,
    /// A retryable error occurred; will return to `Validated` after backoff.
    Failed,
    /// A non-recoverable error occurred. Terminal.
    PermanentlyFailed,
}

impl TransferStatus {
    /// Whether this status never transitions further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::PermanentlyFailed)
    }

    /// The wire/storage representation, matching the `status` column's `TEXT` values.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "validated" => Ok(Self::Validated),
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            other => Err(format!("unknown transfer status {other:?}")),
        }
    }
}

/// The asset being moved: the contract's native balance, or an ERC-20 token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Asset {
    /// The contract's native-currency escrow.
    Native,
    /// An ERC-20 token escrow, identified by its contract address.
    Erc20 {
        /// The token contract address, lowercase `0x`-prefixed hex.
        token_address: String,
    },
}

/// A signed transfer authorization, as ingested from the REST submission endpoint and
/// persisted through the full relayer pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransfer {
    /// Server-assigned identity, present once persisted.
    pub id: Option<i64>,
    /// Opaque, globally-unique nonce chosen by the signer. `0x`-prefixed hex.
    pub nonce: String,
    /// Sender address, `0x`-prefixed 40-hex.
    pub from: String,
    /// Recipient address, `0x`-prefixed 40-hex.
    pub to: String,
    /// Whole-unit decimal amount, e.g. `"1.5"`.
    pub amount: String,
    /// Unix seconds after which the authorization is no longer valid.
    pub deadline: i64,
    /// Raw signature bytes over the EIP-712 typed data, `0x`-prefixed hex.
    pub signature: String,
    /// The escrow contract this authorization is scoped to.
    pub contract_address: String,
    /// Absent for a native transfer, present for an ERC-20 transfer.
    pub token_address: Option<String>,
    /// Current lifecycle state.
    #[serde(default = "default_status")]
    pub status: TransferStatus,
    /// Transaction hash once broadcast.
    pub tx_hash: Option<String>,
    /// Block number once mined.
    pub block_number: Option<i64>,
    /// Number of retry attempts taken so far. Monotonic non-decreasing.
    #[serde(default)]
    pub retry_count: i32,
    /// Most recent error message, if any.
    pub error_message: Option<String>,
    /// When the row was first persisted.
    pub created_at: DateTime<Utc>,
    /// When it passed validation.
    pub validated_at: Option<DateTime<Utc>>,
    /// When the transaction was broadcast.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the receipt was observed as successful.
    pub confirmed_at: Option<DateTime<Utc>>,
}

fn default_status() -> TransferStatus {
    TransferStatus::Received
}

impl SignedTransfer {
    /// The asset this transfer moves, derived from [`Self::token_address`].
    #[must_use]
    pub fn asset(&self) -> Asset {
        match &self.token_address {
            Some(token) => Asset::Erc20 {
                token_address: token.clone(),
            },
            None => Asset::Native,
        }
    }
}

/// An append-only record in a transfer's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    /// Server-assigned identity.
    pub id: Option<i64>,
    /// The transfer this event belongs to.
    pub transfer_id: i64,
    /// The transition target, or a sub-state such as `"retry"` / `"retry_queued"`.
    pub status: String,
    /// Human-readable detail.
    pub message: String,
    /// Structured detail (e.g. `{txHash, blockNumber, gasUsed}`), if any.
    pub metadata: Option<serde_json::Value>,
    /// Wall-clock time of the event.
    pub timestamp: DateTime<Utc>,
}
