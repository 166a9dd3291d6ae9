#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Durable persistence for signed transfers and their event log.
//!
//! Backed by Postgres via `sqlx`, grounded on the relayer pattern of a `PgPool` held behind
//! a thin struct exposing named operations, transactions scoped with `pool.begin()`, and a
//! `StoreError` taxonomy that distinguishes "not found" / "duplicate" / "unavailable" from
//! opaque database failures.

pub mod error;

use chrono::Utc;
use error::StoreError;
use relayer_core::domain::{SignedTransfer, TransferEvent, TransferStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;

/// Handle to the durable transfer store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Builds a pool against `database_url` and runs pending migrations.
    ///
    /// The pool connects lazily: an unreachable database does not fail this call, so the
    /// relayer can still bind its HTTP listener and come up degraded. Callers should treat
    /// a migration failure here as a warning, not a reason to abort startup — queries made
    /// before the database is reachable surface as [`StoreError::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if `database_url` cannot be parsed.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            tracing::warn!(error = %e, "migrations did not run at startup, store is degraded until the database is reachable");
        }

        Ok(Self { pool })
    }

    /// Wraps an already-established pool, skipping migrations (used by callers that run
    /// them separately, and by tests against a pre-migrated pool).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a transfer in `Received` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateNonce`] if `transfer.nonce` already exists.
    pub async fn insert_received(&self, transfer: &SignedTransfer) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO signed_transfers
                (nonce, from_address, to_address, amount, deadline, signature,
                 contract_address, token_address, status, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)
            RETURNING id
            ",
        )
        .bind(&transfer.nonce)
        .bind(&transfer.from)
        .bind(&transfer.to)
        .bind(&transfer.amount)
        .bind(transfer.deadline)
        .bind(decode_signature(&transfer.signature))
        .bind(&transfer.contract_address)
        .bind(&transfer.token_address)
        .bind(TransferStatus::Received.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        let id: i64 = row.try_get("id")?;
        self.append_event(id, "received", "transfer ingested", None).await?;
        Ok(id)
    }

    /// Partially updates a transfer's status and associated fields. Timestamp columns are
    /// only set when their matching status transition is reached.
    pub async fn update_status(&self, update: &StatusUpdate<'_>) -> Result<(), StoreError> {
        let now = Utc::now();
        let (validated_at, submitted_at, confirmed_at) = match update.status {
            TransferStatus::Validated => (Some(now), None, None),
            TransferStatus::Pending => (None, Some(now), None),
            TransferStatus::Confirmed => (None, None, Some(now)),
            _ => (None, None, None),
        };

        sqlx::query(
            r"
            UPDATE signed_transfers SET
                status = $1,
                tx_hash = COALESCE($2, tx_hash),
                block_number = COALESCE($3, block_number),
                retry_count = $4,
                error_message = $5,
                validated_at = COALESCE($6, validated_at),
                submitted_at = COALESCE($7, submitted_at),
                confirmed_at = COALESCE($8, confirmed_at)
            WHERE id = $9
            ",
        )
        .bind(update.status.as_str())
        .bind(update.tx_hash)
        .bind(update.block_number)
        .bind(update.retry_count)
        .bind(update.error_message)
        .bind(validated_at)
        .bind(submitted_at)
        .bind(confirmed_at)
        .bind(update.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks up a transfer by its nonce.
    pub async fn find_by_nonce(&self, nonce: &str) -> Result<Option<SignedTransfer>, StoreError> {
        let row = sqlx::query("SELECT * FROM signed_transfers WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_transfer).transpose()
    }

    /// Looks up a transfer by id.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<SignedTransfer>, StoreError> {
        let row = sqlx::query("SELECT * FROM signed_transfers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_transfer).transpose()
    }

    /// Transfers in `status`, oldest first, excluding `PermanentlyFailed` implicitly (the
    /// caller only ever asks for `Validated` or `Failed`).
    pub async fn list_by_status(&self, status: TransferStatus, limit: i64) -> Result<Vec<SignedTransfer>, StoreError> {
        let rows = sqlx::query("SELECT * FROM signed_transfers WHERE status = $1 ORDER BY created_at ASC LIMIT $2")
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_transfer).collect()
    }

    /// `Failed` transfers still eligible for another attempt.
    pub async fn list_retryable(&self, max_retries: i32, limit: i64) -> Result<Vec<SignedTransfer>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM signed_transfers WHERE status = $1 AND retry_count < $2 ORDER BY created_at ASC LIMIT $3",
        )
        .bind(TransferStatus::Failed.as_str())
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_transfer).collect()
    }

    /// Appends an immutable event to a transfer's audit trail.
    pub async fn append_event(
        &self,
        transfer_id: i64,
        status: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO transfer_events (transfer_id, status, message, metadata) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(transfer_id)
        .bind(status)
        .bind(message)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Every event for a transfer, oldest first.
    pub async fn list_events(&self, transfer_id: i64) -> Result<Vec<TransferEvent>, StoreError> {
        let rows = sqlx::query("SELECT * FROM transfer_events WHERE transfer_id = $1 ORDER BY created_at ASC")
            .bind(transfer_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    /// Transfers where `address` is either sender or recipient, newest first.
    pub async fn list_for_address(&self, address: &str, limit: i64) -> Result<Vec<SignedTransfer>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM signed_transfers WHERE from_address = $1 OR to_address = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_transfer).collect()
    }

    /// Timestamp of the most recent `failed` event for a transfer, used for backoff
    /// comparisons instead of the row's `created_at` (see `RetryPolicy::backoff_for`).
    pub async fn last_failed_event_at(&self, transfer_id: i64) -> Result<Option<chrono::DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT created_at FROM transfer_events WHERE transfer_id = $1 AND status = 'failed' ORDER BY created_at DESC LIMIT 1",
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("created_at")).transpose()?)
    }

    /// Counts used by the `/relayer/stats` endpoint.
    pub async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM signed_transfers GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match TransferStatus::from_str(&status).ok() {
                Some(TransferStatus::Validated) => counts.validated = n,
                Some(TransferStatus::Pending) => counts.pending = n,
                Some(TransferStatus::Failed) => counts.failed = n,
                Some(TransferStatus::Confirmed) => counts.confirmed = n,
                Some(TransferStatus::PermanentlyFailed) => counts.permanently_failed = n,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait::async_trait]
impl relayer_core::validator::NonceStore for Store {
    async fn nonce_taken(
        &self,
        nonce: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool, relayer_core::error::ChainOracleError> {
        let row = sqlx::query("SELECT id FROM signed_transfers WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(match row {
            Some(r) => {
                let id: i64 = r.try_get("id").map_err(StoreError::from)?;
                Some(id) != exclude_id
            }
            None => false,
        })
    }
}

/// Aggregate counts backing the stats endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// Rows in `Validated`, i.e. queued for execution.
    pub validated: i64,
    /// Rows in `Pending`, i.e. broadcast and awaiting confirmation.
    pub pending: i64,
    /// Rows in `Failed`, awaiting retry or exhaustion.
    pub failed: i64,
    /// Rows in `Confirmed`.
    pub confirmed: i64,
    /// Rows in `PermanentlyFailed`.
    pub permanently_failed: i64,
}

/// Fields to patch on a status transition. `None` leaves a column untouched.
#[derive(Debug, Clone, Copy)]
pub struct StatusUpdate<'a> {
    /// The row to update.
    pub id: i64,
    /// The new status.
    pub status: TransferStatus,
    /// Set once, on the transition to `Pending`.
    pub tx_hash: Option<&'a str>,
    /// Set once, on the transition to `Confirmed`.
    pub block_number: Option<i64>,
    /// Always rewritten to the executor's current count.
    pub retry_count: i32,
    /// The latest error, if any.
    pub error_message: Option<&'a str>,
}

fn decode_signature(sig: &str) -> Vec<u8> {
    alloy_primitives::hex::decode(sig.strip_prefix("0x").unwrap_or(sig)).unwrap_or_default()
}

fn row_to_transfer(row: PgRow) -> Result<SignedTransfer, StoreError> {
    let status: String = row.try_get("status")?;
    let signature: Vec<u8> = row.try_get("signature")?;
    Ok(SignedTransfer {
        id: Some(row.try_get("id")?),
        nonce: row.try_get("nonce")?,
        from: row.try_get("from_address")?,
        to: row.try_get("to_address")?,
        amount: row.try_get("amount")?,
        deadline: row.try_get("deadline")?,
        signature: format!("0x{}", alloy_primitives::hex::encode(signature)),
        contract_address: row.try_get("contract_address")?,
        token_address: row.try_get("token_address")?,
        status: TransferStatus::from_str(&status).map_err(StoreError::Unavailable)?,
        tx_hash: row.try_get("tx_hash")?,
        block_number: row.try_get("block_number")?,
        retry_count: row.try_get("retry_count")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        validated_at: row.try_get("validated_at")?,
        submitted_at: row.try_get("submitted_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
    })
}

fn row_to_event(row: PgRow) -> Result<TransferEvent, StoreError> {
    Ok(TransferEvent {
        id: Some(row.try_get("id")?),
        transfer_id: row.try_get("transfer_id")?,
        status: row.try_get("status")?,
        message: row.try_get("message")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("created_at")?,
    })
}
