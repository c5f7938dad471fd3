//! Admin HTTP API.
//!
//! Authentication: POST /auth exchanges an access token for a session token;
//! every other route (except the optional debug endpoint) expects
//! `Authorization: Bearer <session>`.
//!
//!   POST   /auth                        — log in, returns a session token
//!   GET    /status                      — counts + mesh state (view)
//!   GET    /clients                     — one page of known clients (view)
//!   DELETE /clients/{address}           — forget a client (admin)
//!   POST   /clients/{address}/rr        — send a raw request, wait for the response (admin)
//!   POST   /clients/{address}/exchange  — run cell-store commands on a client (admin)
//!   POST   /rr                          — send a raw request to every known client (admin)

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;

use warren_proto::{ExchangeRequest, ExchangeResponse, Heartbeat};

use crate::{
    auth::{AccessLevel, SessionStore},
    control::{ControlError, Controller},
    registry::AwaitError,
    values::{cbor_to_json, json_to_cbor},
};

/// Default number of clients per page.
const DEFAULT_PAGE_LIMIT: usize = 50;

/// Default and maximum wait for a client response, seconds.
const DEFAULT_RR_TIMEOUT_SECS: u64 = 30;
const MAX_RR_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
pub struct ApiState {
    pub controller: Controller,
    pub sessions: Arc<SessionStore>,
}

pub fn router(state: ApiState, debug_endpoint: Option<&str>) -> Router {
    let mut router = Router::new()
        .route("/auth", post(login))
        .route("/status", get(status))
        .route("/clients", get(list_clients))
        .route("/clients/{address}", delete(delete_client))
        .route("/clients/{address}/rr", post(send_one))
        .route("/clients/{address}/exchange", post(send_exchange))
        .route("/rr", post(send_all));

    if let Some(path) = debug_endpoint {
        router = router.route(path, get(debug_mesh));
    }

    router.with_state(state)
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    token: String,
}

async fn login(
    State(state): State<ApiState>,
    Json(body): Json<LoginRequest>,
) -> impl IntoResponse {
    match state.sessions.login(&body.token) {
        Some((session, level)) => Json(json!({
            "session": session,
            "level": level,
            "expires_in_secs": state.sessions.session_validity().as_secs(),
        }))
        .into_response(),
        None => unauthorized(),
    }
}

fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn authorized(state: &ApiState, headers: &HeaderMap, required: AccessLevel) -> bool {
    state.sessions.authorize(bearer(headers), required)
}

fn unauthorized() -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

// ============================================================================
// Status
// ============================================================================

async fn status(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::View) {
        return unauthorized();
    }

    let registry = state.controller.registry();
    Json(json!({
        "clients": registry.clients.count(),
        "transactions": registry.transactions.count(),
        "radio": state.controller.radio().status(),
    }))
    .into_response()
}

async fn debug_mesh(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.controller.radio().status())
}

// ============================================================================
// Clients
// ============================================================================

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

#[derive(Serialize)]
struct ClientView {
    address: String,
    first_heartbeat_time: u64,
    last_heartbeat_time: u64,
    last_heartbeat: Heartbeat,
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

async fn list_clients(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::View) {
        return unauthorized();
    }

    let (clients, total) = state
        .controller
        .registry()
        .clients
        .get_page(params.offset, params.limit);

    let clients: Vec<ClientView> = clients
        .into_iter()
        .map(|c| ClientView {
            address: c.address,
            first_heartbeat_time: unix_secs(c.first_heartbeat_time),
            last_heartbeat_time: unix_secs(c.last_heartbeat_time),
            last_heartbeat: c.last_heartbeat,
        })
        .collect();

    Json(json!({ "total": total, "clients": clients })).into_response()
}

async fn delete_client(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<String>,
) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::Admin) {
        return unauthorized();
    }

    if state.controller.registry().clients.delete(&address) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "client not found" }))).into_response()
    }
}

// ============================================================================
// Request/response
// ============================================================================

#[derive(Deserialize)]
struct SendRequest {
    /// Command payload, base64.
    payload_b64: String,
    /// How long to wait for the response.
    #[serde(default = "default_rr_timeout")]
    timeout_secs: u64,
}

fn default_rr_timeout() -> u64 {
    DEFAULT_RR_TIMEOUT_SECS
}

fn send_params(body: &SendRequest) -> Result<(Vec<u8>, Duration), axum::response::Response> {
    let payload = B64.decode(&body.payload_b64).map_err(|_| {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "payload_b64 is not base64" })))
            .into_response()
    })?;
    let timeout = Duration::from_secs(body.timeout_secs.min(MAX_RR_TIMEOUT_SECS));
    Ok((payload, timeout))
}

async fn send_one(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::Admin) {
        return unauthorized();
    }
    let (payload, timeout) = match send_params(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.controller.send_request(&address, payload, timeout).await {
        Ok(response) => Json(json!({
            "tx_id": response.tx_id,
            "payload_b64": B64.encode(&response.payload),
        }))
        .into_response(),
        Err(e) => control_error(e),
    }
}

async fn send_all(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::Admin) {
        return unauthorized();
    }
    let (payload, timeout) = match send_params(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let outcome = state.controller.send_to_all(&payload, timeout).await;

    let results: Vec<serde_json::Value> = outcome
        .results
        .iter()
        .map(|(address, result)| match result {
            Ok(response) => json!({
                "address": address,
                "ok": true,
                "payload_b64": B64.encode(&response.payload),
            }),
            Err(e) => json!({
                "address": address,
                "ok": false,
                "error": e.to_string(),
            }),
        })
        .collect();

    Json(json!({
        "sent": outcome.results.len(),
        "errored": outcome.errored,
        "error": outcome.aggregate().err().map(|e| e.to_string()),
        "results": results,
    }))
    .into_response()
}

// ============================================================================
// Exchange
// ============================================================================

#[derive(Deserialize)]
struct ExchangeBody {
    /// Cells to write, values as JSON.
    #[serde(default)]
    set: serde_json::Map<String, serde_json::Value>,
    /// Cells to read back.
    #[serde(default)]
    get: Vec<String>,
    #[serde(default)]
    dump: bool,
    #[serde(default)]
    prune: bool,
    #[serde(default = "default_rr_timeout")]
    timeout_secs: u64,
}

async fn send_exchange(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<ExchangeBody>,
) -> impl IntoResponse {
    if !authorized(&state, &headers, AccessLevel::Admin) {
        return unauthorized();
    }

    let request = ExchangeRequest {
        set: body
            .set
            .iter()
            .map(|(name, value)| (name.clone(), json_to_cbor(value)))
            .collect(),
        get: body.get,
        dump: body.dump,
        prune: body.prune,
    };
    let payload = match request.to_bytes() {
        Ok(payload) => payload,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };
    let timeout = Duration::from_secs(body.timeout_secs.min(MAX_RR_TIMEOUT_SECS));

    let response = match state.controller.send_request(&address, payload, timeout).await {
        Ok(response) => response,
        Err(e) => return control_error(e),
    };

    match ExchangeResponse::from_bytes(&response.payload) {
        Ok(exchange) => Json(json!({
            "set": exchange.set,
            "get": exchange
                .get
                .iter()
                .map(|(name, value)| (name.clone(), cbor_to_json(value)))
                .collect::<serde_json::Map<_, _>>(),
            "dump": exchange.dump.map(|dump| dump
                .iter()
                .map(|(name, value)| (name.clone(), cbor_to_json(value)))
                .collect::<serde_json::Map<_, _>>()),
            "pruned": exchange.pruned,
        }))
        .into_response(),
        // The agent answered with an error message instead of a result.
        Err(_) => Json(json!({
            "error": String::from_utf8_lossy(&response.payload),
        }))
        .into_response(),
    }
}

fn control_error(e: ControlError) -> axum::response::Response {
    let status = match &e {
        ControlError::Await(AwaitError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        ControlError::Await(AwaitError::NotFound(_)) => StatusCode::NOT_FOUND,
        ControlError::Radio(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
