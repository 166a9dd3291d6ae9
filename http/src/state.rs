//! Shared application state, held as `Arc<AppState>` and passed to every handler via axum's
//! `State` extractor — never as ambient/global state.

use crate::ratelimit::RateLimiter;
use relayer_bus::EventBus;
use relayer_core::validator::Validator;
use relayer_evm::ChainGateway;
use relayer_executor::Executor;
use relayer_store::Store;
use std::sync::Arc;

/// Everything the ingress router needs to serve requests.
pub struct AppState {
    /// Durable transfer store.
    pub store: Arc<Store>,
    /// Live event fan-out.
    pub bus: Arc<EventBus>,
    /// Scheduler, owning the concurrency cap the admin endpoint adjusts.
    pub executor: Arc<Executor>,
    /// Chain reads used for ingest-time validation.
    pub gateway: Arc<ChainGateway>,
    /// Signature/deadline/balance/lockout validation.
    pub validator: Validator,
    /// Per-client submission rate limiter.
    pub rate_limiter: RateLimiter,
    /// HTTP Basic credential required for `/relayer/admin/*`, as `user:password`.
    pub admin_credential: String,
    /// Process start time, for the health endpoint's uptime figure.
    pub started_at: std::time::Instant,
}

/// Shared, cloneable handle passed to axum's `State` extractor.
pub type SharedState = Arc<AppState>;
