//! REST ingress: submission, status, stats, health, and the admin concurrency knob.
//!
//! Grounded on the facilitator's `handlers.rs` — plain `async fn(State, ...) -> Result<Json<_>, Error>`
//! handlers wired into a router with `.with_state`, no middleware stack beyond tracing/CORS.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use relayer_core::domain::{SignedTransfer, TransferStatus};
use relayer_core::validator::verdict_to_error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

static ADDRESS_RE: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap());
static HEX_RE: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"^0x[0-9a-fA-F]+$").unwrap());

/// Request body for `POST /relayer/submit`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    from: String,
    to: String,
    amount: String,
    nonce: String,
    deadline: i64,
    signature: String,
    contract_address: String,
    #[serde(default)]
    token_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    transfer_id: i64,
    message: &'static str,
}

fn validate_shape(req: &SubmitRequest) -> Vec<String> {
    let mut errors = Vec::new();
    if !ADDRESS_RE.is_match(&req.from) {
        errors.push("from must be a 20-byte hex address".into());
    }
    if !ADDRESS_RE.is_match(&req.to) {
        errors.push("to must be a 20-byte hex address".into());
    }
    if !ADDRESS_RE.is_match(&req.contract_address) {
        errors.push("contractAddress must be a 20-byte hex address".into());
    }
    if let Some(token) = &req.token_address {
        if !ADDRESS_RE.is_match(token) {
            errors.push("tokenAddress must be a 20-byte hex address".into());
        }
    }
    if !HEX_RE.is_match(&req.nonce) {
        errors.push("nonce must be hex".into());
    }
    if !HEX_RE.is_match(&req.signature) {
        errors.push("signature must be hex".into());
    }
    match rust_decimal::Decimal::from_str(&req.amount) {
        Ok(d) if d.is_sign_positive() && !d.is_zero() => {}
        _ => errors.push("amount must be a positive decimal string".into()),
    }
    if req.deadline <= 0 {
        errors.push("deadline must be a positive unix timestamp".into());
    }
    errors
}

async fn submit_transfer(State(state): State<SharedState>, Json(req): Json<SubmitRequest>) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    state.rate_limiter.check(&req.from).map_err(ApiError::RateLimited)?;

    let shape_errors = validate_shape(&req);
    if !shape_errors.is_empty() {
        return Err(ApiError::InvalidInput(shape_errors));
    }

    let transfer = SignedTransfer {
        id: None,
        nonce: req.nonce,
        from: req.from,
        to: req.to,
        amount: req.amount,
        deadline: req.deadline,
        signature: req.signature,
        contract_address: req.contract_address,
        token_address: req.token_address,
        status: TransferStatus::Received,
        tx_hash: None,
        block_number: None,
        retry_count: 0,
        error_message: None,
        created_at: chrono::Utc::now(),
        validated_at: None,
        submitted_at: None,
        confirmed_at: None,
    };

    let verdict = state.validator.validate(&transfer, state.gateway.as_ref(), state.store.as_ref(), None).await;
    if !verdict.is_valid {
        let error = verdict_to_error(&verdict).expect("invalid verdict yields an error");
        return Err(ApiError::InvalidInput(vec![error.to_string()]));
    }

    let id = state.store.insert_received(&transfer).await?;
    state
        .store
        .update_status(&relayer_store::StatusUpdate {
            id,
            status: TransferStatus::Validated,
            tx_hash: None,
            block_number: None,
            retry_count: 0,
            error_message: None,
        })
        .await?;
    state.store.append_event(id, "validated", "passed signature and oracle checks", None).await?;
    state.bus.publish_lifecycle("payment_accepted", Some(id), serde_json::json!({"transferId": id}));

    let body = SubmitResponse {
        success: true,
        transfer_id: id,
        message: "transfer accepted",
    };
    Ok((StatusCode::CREATED, Json(serde_json::to_value(body).unwrap())))
}

async fn get_transfer(State(state): State<SharedState>, Path(id): Path<i64>) -> Result<Json<serde_json::Value>, ApiError> {
    let transfer = state.store.find_by_id(id).await?.ok_or(ApiError::NotFound)?;
    let events = state.store.list_events(id).await?;
    Ok(Json(serde_json::json!({"transfer": transfer, "events": events})))
}

async fn get_stats(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.store.status_counts().await?;
    Ok(Json(serde_json::json!({
        "queue": {
            "pending": counts.validated,
            "processing": counts.pending,
            "failed": counts.failed,
            "completed": counts.confirmed,
        },
        "processing": {
            "current": state.executor.in_flight_count(),
            "max": state.executor.concurrency().max(),
        },
        "timestamp": chrono::Utc::now(),
    })))
}

async fn get_health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct ConcurrencyRequest {
    #[serde(rename = "maxConcurrent")]
    max_concurrent: usize,
}

async fn put_admin_concurrency(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ConcurrencyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_admin_auth(&headers, &state.admin_credential)?;
    let applied = state.executor.concurrency().resize(req.max_concurrent);
    Ok(Json(serde_json::json!({"success": true, "maxConcurrent": applied})))
}

fn check_admin_auth(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let header = headers.get(axum::http::header::AUTHORIZATION).ok_or(ApiError::Unauthorized)?;
    let value = header.to_str().map_err(|_| ApiError::Unauthorized)?;
    let encoded = value.strip_prefix("Basic ").ok_or(ApiError::Unauthorized)?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).map_err(|_| ApiError::Unauthorized)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;
    if decoded == expected {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn get_transactions_for_address(State(state): State<SharedState>, Path(address): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    if !ADDRESS_RE.is_match(&address) {
        return Err(ApiError::InvalidInput(vec!["address must be a 20-byte hex address".into()]));
    }
    let transfers = state.store.list_for_address(&address, 50).await?;
    Ok(Json(serde_json::json!({"transfers": transfers})))
}

/// Builds the ingress router. `submit`/`transfers` are registered as synonyms.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/relayer/submit", axum::routing::post(submit_transfer))
        .route("/relayer/transfers", axum::routing::post(submit_transfer))
        .route("/relayer/transfers/{id}", get(get_transfer))
        .route("/relayer/stats", get(get_stats))
        .route("/relayer/health", get(get_health))
        .route("/relayer/admin/concurrency", put(put_admin_concurrency))
        .route("/transactions/{address}", get(get_transactions_for_address))
        .with_state(state)
}
