#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! The queue and executor: advances `validated` transfers through submission to a terminal
//! state, under a bounded concurrency cap, with idempotent crash recovery and exponential
//! backoff on retryable failures.
//!
//! Grounded on two patterns from the retrieval pack: the `resume_inflight` / state-enum
//! processor loop (an omnichain relayer's scheduler) for crash recovery, and the
//! transaction-sender's classify-then-retry loop for backoff. Concurrency and per-id
//! mutual exclusion are implemented with the facilitator's own `dashmap` dependency rather
//! than a borrowed worker-pool crate.

pub mod concurrency;

use chrono::Utc;
use concurrency::ConcurrencyCap;
use dashmap::DashSet;
use relayer_bus::EventBus;
use relayer_core::config::RetryPolicy;
use relayer_core::domain::{SignedTransfer, TransferStatus};
use relayer_core::validator::{Validator, verdict_to_error};
use relayer_evm::ChainGateway;
use relayer_store::{StatusUpdate, Store};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How often the scheduler wakes up to look for work.
pub const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Shared handles the executor needs; constructed once in `main` and held as an `Arc`.
pub struct Executor {
    store: Arc<Store>,
    gateway: Arc<ChainGateway>,
    bus: Arc<EventBus>,
    validator: Validator,
    retry_policy: RetryPolicy,
    concurrency: ConcurrencyCap,
    in_flight: Arc<DashSet<i64>>,
}

impl Executor {
    /// Builds an executor with the given collaborators and an initial concurrency cap.
    #[must_use]
    pub fn new(store: Arc<Store>, gateway: Arc<ChainGateway>, bus: Arc<EventBus>, validator: Validator, retry_policy: RetryPolicy, initial_concurrency: usize) -> Self {
        Self {
            store,
            gateway,
            bus,
            validator,
            retry_policy,
            concurrency: ConcurrencyCap::new(initial_concurrency),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// The live concurrency cap, adjustable by the admin endpoint.
    #[must_use]
    pub fn concurrency(&self) -> &ConcurrencyCap {
        &self.concurrency
    }

    /// Number of transfers currently occupying an execution slot.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs the scheduler loop until `cancel` fires. Performs a one-time crash-recovery
    /// sweep of `Pending` rows before entering the regular tick loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.resume_inflight().await;

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("executor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// On boot, re-examine every `Pending` row: each either resolves via the race-recovery
    /// branch (already mined while we were down) or is resubmitted.
    async fn resume_inflight(self: &Arc<Self>) {
        let Ok(pending) = self.store.list_by_status(TransferStatus::Pending, 1000).await else {
            tracing::warn!("could not list pending transfers for crash recovery");
            return;
        };
        for transfer in pending {
            tracing::info!(id = transfer.id, "resuming in-flight transfer after restart");
            self.clone_and_spawn(transfer.id.unwrap_or_default());
        }
    }

    async fn tick(self: &Arc<Self>) {
        let free_slots = self.concurrency.available();
        if free_slots > 0 {
            if let Ok(validated) = self.store.list_by_status(TransferStatus::Validated, free_slots as i64).await {
                for transfer in validated {
                    if let Some(id) = transfer.id {
                        self.clone_and_spawn(id);
                    }
                }
            }
        }

        self.requeue_ready_retries().await;
    }

    /// Scans `Failed` rows and flips any whose backoff window has elapsed back to
    /// `Validated`, so the next tick's scan picks them up. The comparison point is the most
    /// recent `failed` event's timestamp, not the row's `created_at` — comparing against
    /// `created_at` under-counts backoff for a transfer that has already retried once.
    async fn requeue_ready_retries(&self) {
        let Ok(candidates) = self.store.list_retryable(self.retry_policy.max_retries, 100).await else {
            return;
        };
        for transfer in candidates {
            let Some(id) = transfer.id else { continue };
            let Ok(Some(last_failed)) = self.store.last_failed_event_at(id).await else {
                continue;
            };
            let elapsed = Utc::now().signed_duration_since(last_failed);
            let backoff = self.retry_policy.backoff_for(transfer.retry_count);
            if elapsed.num_seconds() as u64 >= backoff.as_secs() {
                let update = StatusUpdate {
                    id,
                    status: TransferStatus::Validated,
                    tx_hash: None,
                    block_number: None,
                    retry_count: transfer.retry_count,
                    error_message: None,
                };
                if self.store.update_status(&update).await.is_ok() {
                    let _ = self.store.append_event(id, "retry_queued", "backoff elapsed, re-queued for execution", None).await;
                    self.bus.publish_lifecycle("payment_retry_queued", Some(id), serde_json::json!({"transferId": id}));
                }
            }
        }
    }

    fn clone_and_spawn(self: &Arc<Self>, id: i64) {
        if !self.in_flight.insert(id) {
            return; // already owned by another slot
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = this.concurrency.acquire().await;
            this.execute_one(id).await;
            drop(permit);
            this.in_flight.remove(&id);
        });
    }

    /// Executes a single transfer end to end. Idempotent: safe to call again for a row that
    /// crashed mid-flight, because every step re-checks the persisted status before acting.
    #[tracing::instrument(skip(self))]
    async fn execute_one(&self, id: i64) {
        let Ok(Some(transfer)) = self.store.find_by_id(id).await else {
            tracing::warn!(id, "execute_one: transfer disappeared");
            return;
        };

        if !matches!(transfer.status, TransferStatus::Validated | TransferStatus::Pending) {
            return; // another slot already advanced this row
        }

        let verdict = self.validator.validate(&transfer, self.gateway.as_ref(), self.store.as_ref(), Some(id)).await;

        if !verdict.is_valid {
            if let Some(recovered) = self.try_race_recovery(&transfer, &verdict).await {
                if recovered {
                    return;
                }
            }

            let error = verdict_to_error(&verdict).expect("invalid verdict always yields an error");
            if error.retryable {
                self.record_failure(&transfer, &error.to_string(), true).await;
            } else {
                self.record_permanent_failure(&transfer, &error.to_string()).await;
            }
            return;
        }

        if transfer.status == TransferStatus::Validated {
            self.transition_to_pending(&transfer).await;
        }

        self.submit_and_await(&transfer).await;
    }

    /// If validation failed solely because the nonce is already used on-chain, and this row
    /// already carries its own `txHash` + `blockNumber`, the chain accepted the transaction
    /// before a crash prevented us from recording it. Treat it as confirmed rather than a
    /// failure. Returns `Some(true)` if recovery applied, `Some(false)` if the nonce hit is
    /// real but not ours, `None` if the failure wasn't a nonce hit at all.
    async fn try_race_recovery(&self, transfer: &SignedTransfer, verdict: &relayer_core::validator::Verdict) -> Option<bool> {
        if verdict.nonce_unused {
            return None;
        }
        let solely_nonce = verdict.errors.len() == 1 || verdict.errors.iter().all(|e| e.contains("nonce"));
        if !solely_nonce {
            return None;
        }
        match (&transfer.tx_hash, transfer.block_number) {
            (Some(tx_hash), Some(block_number)) => {
                tracing::info!(id = transfer.id, tx_hash, "race recovery: transaction already mined, marking confirmed");
                self.mark_confirmed(transfer, tx_hash, block_number, None).await;
                Some(true)
            }
            _ => Some(false),
        }
    }

    async fn transition_to_pending(&self, transfer: &SignedTransfer) {
        let Some(id) = transfer.id else { return };
        let _ = self
            .store
            .update_status(&StatusUpdate {
                id,
                status: TransferStatus::Pending,
                tx_hash: None,
                block_number: None,
                retry_count: transfer.retry_count,
                error_message: None,
            })
            .await;
        let _ = self.store.append_event(id, "pending", "submitting to chain", None).await;
        self.bus.publish_lifecycle("payment_pending", Some(id), serde_json::json!({"transferId": id}));
    }

    async fn submit_and_await(&self, transfer: &SignedTransfer) {
        let Some(id) = transfer.id else { return };

        let Ok(from) = alloy_primitives::Address::from_str(&transfer.from) else {
            self.record_permanent_failure(transfer, "malformed from address").await;
            return;
        };
        let Ok(to) = alloy_primitives::Address::from_str(&transfer.to) else {
            self.record_permanent_failure(transfer, "malformed to address").await;
            return;
        };
        let Some(amount) = parse_amount(&transfer.amount) else {
            self.record_permanent_failure(transfer, "malformed amount").await;
            return;
        };
        let nonce = parse_nonce(&transfer.nonce);
        let deadline = alloy_primitives::U256::from(transfer.deadline.max(0) as u64);
        let signature = alloy_primitives::hex::decode(transfer.signature.strip_prefix("0x").unwrap_or(&transfer.signature)).unwrap_or_default();

        let result = match &transfer.token_address {
            Some(token) => match alloy_primitives::Address::from_str(token) {
                Ok(token) => self.gateway.execute_erc20_transfer(token, from, to, amount, nonce, deadline, &signature).await,
                Err(_) => {
                    self.record_permanent_failure(transfer, "malformed tokenAddress").await;
                    return;
                }
            },
            None => self.gateway.execute_eth_transfer(from, to, amount, nonce, deadline, &signature).await,
        };

        match result {
            Ok(receipt) => {
                let tx_hash = format!("{:#x}", receipt.transaction_hash);
                let block_number = receipt.block_number.unwrap_or_default() as i64;
                let _ = self
                    .store
                    .update_status(&StatusUpdate {
                        id,
                        status: TransferStatus::Pending,
                        tx_hash: Some(&tx_hash),
                        block_number: None,
                        retry_count: transfer.retry_count,
                        error_message: None,
                    })
                    .await;
                let _ = self.store.append_event(id, "submitted", "transaction broadcast", Some(serde_json::json!({"txHash": tx_hash}))).await;
                self.bus.publish_lifecycle("payment_submitted", Some(id), serde_json::json!({"transferId": id, "txHash": tx_hash}));

                self.mark_confirmed(transfer, &tx_hash, block_number, Some(receipt.gas_used)).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    self.record_failure(transfer, &err.to_string(), true).await;
                } else {
                    self.record_permanent_failure(transfer, &err.to_string()).await;
                }
            }
        }
    }

    async fn mark_confirmed(&self, transfer: &SignedTransfer, tx_hash: &str, block_number: i64, gas_used: Option<u64>) {
        let Some(id) = transfer.id else { return };
        let _ = self
            .store
            .update_status(&StatusUpdate {
                id,
                status: TransferStatus::Confirmed,
                tx_hash: Some(tx_hash),
                block_number: Some(block_number),
                retry_count: transfer.retry_count,
                error_message: None,
            })
            .await;
        let mut metadata = serde_json::json!({"txHash": tx_hash, "blockNumber": block_number});
        if let Some(gas) = gas_used {
            metadata["gasUsed"] = serde_json::json!(gas);
        }
        let _ = self.store.append_event(id, "confirmed", "transaction confirmed", Some(metadata)).await;
        self.bus.publish_lifecycle("payment_confirmed", Some(id), serde_json::json!({"transferId": id, "txHash": tx_hash, "blockNumber": block_number}));
    }

    /// Records a retryable submission/validation failure. The transfer stays in `Failed`
    /// even once retries are exhausted — `list_retryable` excludes it from further scans, so
    /// it never leaves `Failed`, which is the terminal state for this retry policy.
    /// `PermanentlyFailed` is reserved for non-recoverable errors (see
    /// `record_permanent_failure`).
    async fn record_failure(&self, transfer: &SignedTransfer, message: &str, retryable: bool) {
        if !retryable {
            return self.record_permanent_failure(transfer, message).await;
        }
        let Some(id) = transfer.id else { return };
        let next_retry_count = transfer.retry_count + 1;
        let _ = self
            .store
            .update_status(&StatusUpdate {
                id,
                status: TransferStatus::Failed,
                tx_hash: None,
                block_number: None,
                retry_count: next_retry_count,
                error_message: Some(message),
            })
            .await;
        let retries_exhausted = next_retry_count >= self.retry_policy.max_retries;
        let detail = if retries_exhausted { format!("{message} (retries exhausted)") } else { message.to_owned() };
        let _ = self.store.append_event(id, "failed", &detail, None).await;
        self.bus.publish_lifecycle("payment_failed", Some(id), serde_json::json!({"transferId": id, "error": message}));
    }

    async fn record_permanent_failure(&self, transfer: &SignedTransfer, message: &str) {
        let Some(id) = transfer.id else { return };
        let _ = self
            .store
            .update_status(&StatusUpdate {
                id,
                status: TransferStatus::PermanentlyFailed,
                tx_hash: None,
                block_number: None,
                retry_count: transfer.retry_count,
                error_message: Some(message),
            })
            .await;
        let _ = self.store.append_event(id, "permanently_failed", message, None).await;
        self.bus.publish_lifecycle("payment_permanently_failed", Some(id), serde_json::json!({"transferId": id, "error": message}));
    }
}

fn parse_amount(amount: &str) -> Option<alloy_primitives::U256> {
    let decimal = rust_decimal::Decimal::from_str(amount).ok()?;
    alloy_primitives::U256::from_str(&decimal.round_dp(0).to_string()).ok()
}

fn parse_nonce(nonce: &str) -> alloy_primitives::B256 {
    let trimmed = nonce.strip_prefix("0x").unwrap_or(nonce);
    match alloy_primitives::hex::decode(trimmed) {
        Ok(bytes) if bytes.len() == 32 => alloy_primitives::B256::from_slice(&bytes),
        Ok(bytes) => alloy_primitives::keccak256(&bytes),
        Err(_) => alloy_primitives::keccak256(nonce.as_bytes()),
    }
}
