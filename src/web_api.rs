//! Web API Server
//!
//! HTTP and WebSocket surface of the orchestrator.
//!
//! ## Endpoints
//!
//! ### WebSocket
//! - `GET /ws`: job protocol: inbound `analyze` / `cancel` commands,
//!   outbound job events. One [`Connection`] per socket.
//!
//! ### Demo
//! - `GET  /api/demo/status?sessionId=…`: remaining demo allowance
//! - `POST /api/research/classify`: `{ "message" }` → `{ "isResearch" }`
//!
//! ### Router administration (mutations need an operator token)
//! - `GET  /api/router/rules?userId=…`: current rule set for a scope
//! - `PUT  /api/router/rules?userId=…`: publish a new version
//! - `GET  /api/router/versions?userId=…`: version history
//! - `GET  /api/router/diff?from=…&to=…&userId=…`: compare two versions
//! - `POST /api/router/revert/:version?userId=…`: republish an old version
//!
//! ### Model aliases (mutations need an operator token)
//! - `GET  /api/models/aliases`
//! - `PUT  /api/models/aliases/:alias`: `{ "model" }`
//! - `POST /api/models/aliases/reset`
//!
//! ### Utility
//! - `GET /health`, `GET /metrics`

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionDenial;
use crate::config::ServerConfig;
use crate::enhanced::SlidingWindowLimiter;
use crate::events::{InboundCommand, JobEvent, Phase};
use crate::orchestrator::{Connection, ConnectionContext, Orchestrator};
use crate::registry::{AliasEntry, RegistryError};
use crate::routing::{RouterError, RuleScope, RuleSetDiff, RuleSetDraft, RuleSetVersion};
use crate::OrchestratorError;

// ============================================================================
// Constants
// ============================================================================

/// Inbound WebSocket commands accepted per connection per minute.
const WS_RATE_LIMIT_PER_MIN: usize = 60;

/// Outbound event buffer per connection.
const WS_EVENT_BUFFER: usize = 256;

/// Author recorded on rule sets published over HTTP.
const OPERATOR_AUTHOR: &str = "operator";

// ============================================================================
// State
// ============================================================================

/// Shared state available to all handlers.
struct ApiState {
    orch: Arc<Orchestrator>,
    operator_tokens: Vec<String>,
    max_message_bytes: usize,
    ping_interval: Duration,
}

impl ApiState {
    fn bearer<'h>(headers: &'h HeaderMap) -> Option<&'h str> {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    fn is_operator(&self, headers: &HeaderMap) -> bool {
        Self::bearer(headers).is_some_and(|t| self.operator_tokens.iter().any(|known| known == t))
    }

    fn require_operator(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if self.operator_tokens.is_empty() {
            return Err(ApiError::Forbidden);
        }
        if self.is_operator(headers) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

/// First `X-Forwarded-For` hop, or the peer address.
fn client_origin(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

// ============================================================================
// Server
// ============================================================================

/// Build the application router.
pub fn router(orch: Arc<Orchestrator>, config: &ServerConfig, metrics_enabled: bool) -> Router {
    let state = Arc::new(ApiState {
        orch,
        operator_tokens: config.operator_tokens.clone(),
        max_message_bytes: config.max_message_bytes,
        ping_interval: Duration::from_secs(config.ping_interval_s.max(1)),
    });

    let mut app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/demo/status", get(demo_status_handler))
        .route("/api/research/classify", post(research_handler))
        .route("/api/router/rules", get(get_rules_handler).put(put_rules_handler))
        .route("/api/router/versions", get(versions_handler))
        .route("/api/router/diff", get(diff_handler))
        .route("/api/router/revert/:version", post(revert_handler))
        .route("/api/models/aliases", get(aliases_handler))
        .route("/api/models/aliases/reset", post(reset_aliases_handler))
        .route("/api/models/aliases/:alias", put(update_alias_handler))
        .route("/health", get(health_handler));
    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    if allowed.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
}

/// Serve `app` on `listener` until `shutdown` fires.
///
/// # Errors
///
/// [`OrchestratorError::Other`] if the server fails.
pub async fn serve_on(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), OrchestratorError> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| OrchestratorError::Other(format!("web server failed: {e}")))
}

/// Bind `config.host:config.port` and serve until `shutdown` fires.
///
/// # Errors
///
/// [`OrchestratorError::Other`] if the address cannot be bound or the
/// server fails.
pub async fn start_server(
    orch: Arc<Orchestrator>,
    config: ServerConfig,
    metrics_enabled: bool,
    shutdown: CancellationToken,
) -> Result<(), OrchestratorError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Other(format!("bind {addr}: {e}")))?;
    info!(addr = %addr, "web API listening");
    serve_on(listener, router(orch, &config, metrics_enabled), shutdown).await
}

// ============================================================================
// Middleware
// ============================================================================

/// Echoes the client's `X-Request-ID`, or assigns a fresh one.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

// ============================================================================
// WebSocket
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketQuery {
    session_id: Option<String>,
    user_id: Option<String>,
}

/// `GET /ws`: upgrade to the job protocol.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
) -> Response {
    let session_id = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let origin = client_origin(&headers, peer);
    let ctx = if state.is_operator(&headers) {
        ConnectionContext::authenticated(session_id, origin, query.user_id)
    } else {
        ConnectionContext::anonymous(session_id, origin)
    };

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| websocket_session(socket, state, ctx))
}

/// Drive one socket: a writer task forwards job events and keep-alive
/// pings while this task reads commands.
async fn websocket_session(socket: WebSocket, state: Arc<ApiState>, ctx: ConnectionContext) {
    let session_id = ctx.session_id.clone();
    info!(session_id = %session_id, authenticated = ctx.authenticated, "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<JobEvent>(WS_EVENT_BUFFER);
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);

    let ping_interval = state.ping_interval;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;
        loop {
            let message = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            warn!(error = %e, "failed to serialize job event");
                            continue;
                        }
                    },
                    None => break,
                },
                control = control_rx.recv() => match control {
                    Some(message) => message,
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let limiter = SlidingWindowLimiter::new(WS_RATE_LIMIT_PER_MIN, chrono::Duration::minutes(1));
    let mut connection = Connection::new(Arc::clone(&state.orch), ctx, event_tx.clone());

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if limiter.try_acquire(&session_id, Utc::now()).is_err() {
                    let rejected = JobEvent::error(
                        Uuid::new_v4().to_string(),
                        Phase::Started,
                        "rate limit exceeded",
                    );
                    if event_tx.send(rejected).await.is_err() {
                        break;
                    }
                    continue;
                }
                match serde_json::from_str::<InboundCommand>(&text) {
                    Ok(command) => connection.handle(command).await,
                    Err(e) => {
                        debug!(session_id = %session_id, error = %e, "invalid inbound command");
                        let invalid = JobEvent::error(
                            Uuid::new_v4().to_string(),
                            Phase::Started,
                            format!("invalid command: {e}"),
                        );
                        if event_tx.send(invalid).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                if control_tx.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Dropping the connection cancels any running job.
    drop(connection);
    drop(event_tx);
    drop(control_tx);
    writer.abort();
    info!(session_id = %session_id, "WebSocket client disconnected");
}

// ============================================================================
// Demo & research
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    session_id: Option<String>,
}

/// `GET /api/demo/status`
async fn demo_status_handler(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    let origin = client_origin(&headers, peer);
    let session_id = query.session_id.unwrap_or_default();
    Json(state.orch.admission().status(&session_id, &origin)).into_response()
}

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    message: String,
}

/// `POST /api/research/classify`
///
/// Costs a model call, so demo callers pass admission control first. The
/// session is taken from `?sessionId=`, falling back to the origin.
async fn research_handler(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    Json(req): Json<ResearchRequest>,
) -> Result<Response, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let origin = client_origin(&headers, peer);
    let session_id = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| origin.clone());
    let ctx = if state.is_operator(&headers) {
        ConnectionContext::authenticated(session_id, origin, None)
    } else {
        ConnectionContext::anonymous(session_id, origin)
    };
    let verdict = state.orch.classify_research(&req.message, &ctx).await?;
    Ok(Json(verdict).into_response())
}

// ============================================================================
// Router administration
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeQuery {
    user_id: Option<String>,
}

impl ScopeQuery {
    fn scope(&self) -> RuleScope {
        RuleScope::for_user(self.user_id.as_deref())
    }
}

/// Rule set as served over HTTP.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RulesView {
    scope: String,
    version: Option<u32>,
    author: Option<String>,
    rule_set: RuleSetDraft,
}

impl RulesView {
    fn from_version(v: &RuleSetVersion) -> Self {
        Self {
            scope: v.scope.to_string(),
            version: Some(v.version),
            author: v.author.clone(),
            rule_set: v.rule_set.to_draft(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionSummary {
    version: u32,
    created_at: DateTime<Utc>,
    author: Option<String>,
    note: Option<String>,
    rule_count: usize,
}

/// `GET /api/router/rules`: falls back to the org set, then the built-in set.
async fn get_rules_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ScopeQuery>,
) -> Json<RulesView> {
    let store = state.orch.router().store();
    let scope = query.scope();
    let current = store
        .current(&scope)
        .or_else(|| store.current(&RuleScope::Org));
    Json(match current {
        Some(v) => RulesView::from_version(&v),
        None => RulesView {
            scope: RuleScope::Org.to_string(),
            version: None,
            author: None,
            rule_set: RuleSetDraft::builtin(),
        },
    })
}

/// `PUT /api/router/rules`
async fn put_rules_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    Json(draft): Json<RuleSetDraft>,
) -> Result<Response, ApiError> {
    state.require_operator(&headers)?;
    let version = state.orch.router().store().publish(
        query.scope(),
        draft,
        Some(OPERATOR_AUTHOR.to_string()),
        state.orch.registry(),
    )?;
    Ok((StatusCode::CREATED, Json(RulesView::from_version(&version))).into_response())
}

/// `GET /api/router/versions`
async fn versions_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ScopeQuery>,
) -> Json<Vec<VersionSummary>> {
    let history = state.orch.router().store().history(&query.scope());
    Json(
        history
            .iter()
            .map(|v| VersionSummary {
                version: v.version,
                created_at: v.created_at,
                author: v.author.clone(),
                note: v.note.clone(),
                rule_count: v.rule_set.rules().len(),
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiffQuery {
    from: u32,
    to: u32,
    user_id: Option<String>,
}

/// `GET /api/router/diff`
async fn diff_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<RuleSetDiff>, ApiError> {
    let scope = RuleScope::for_user(query.user_id.as_deref());
    Ok(Json(
        state
            .orch
            .router()
            .store()
            .diff(&scope, query.from, query.to)?,
    ))
}

/// `POST /api/router/revert/:version`
async fn revert_handler(
    State(state): State<Arc<ApiState>>,
    Path(version): Path<u32>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.require_operator(&headers)?;
    let reverted = state.orch.router().store().revert(
        &query.scope(),
        version,
        Some(OPERATOR_AUTHOR.to_string()),
        state.orch.registry(),
    )?;
    Ok((StatusCode::CREATED, Json(RulesView::from_version(&reverted))).into_response())
}

// ============================================================================
// Model aliases
// ============================================================================

/// `GET /api/models/aliases`
async fn aliases_handler(State(state): State<Arc<ApiState>>) -> Json<Vec<AliasEntry>> {
    Json(state.orch.registry().snapshot())
}

#[derive(Debug, Deserialize)]
struct AliasUpdate {
    model: String,
}

/// `PUT /api/models/aliases/:alias`
async fn update_alias_handler(
    State(state): State<Arc<ApiState>>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    Json(update): Json<AliasUpdate>,
) -> Result<Json<Vec<AliasEntry>>, ApiError> {
    state.require_operator(&headers)?;
    state.orch.registry().update(&alias, update.model.trim())?;
    info!(alias = %alias, model = %update.model.trim(), "alias updated by operator");
    Ok(Json(state.orch.registry().snapshot()))
}

/// `POST /api/models/aliases/reset`
async fn reset_aliases_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AliasEntry>>, ApiError> {
    state.require_operator(&headers)?;
    state.orch.registry().reset_to_defaults();
    Ok(Json(state.orch.registry().snapshot()))
}

// ============================================================================
// Utility Handlers
// ============================================================================

/// `GET /health`
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics`: Prometheus text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

// ============================================================================
// Error Type
// ============================================================================

/// Handler errors; each maps to a status code and a JSON error body.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Unprocessable(String),
    TooManyRequests(AdmissionDenial),
}

impl From<AdmissionDenial> for ApiError {
    fn from(e: AdmissionDenial) -> Self {
        ApiError::TooManyRequests(e)
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::UnknownVersion { .. } | RouterError::NoRuleSet(_) => {
                ApiError::NotFound(e.to_string())
            }
            other => ApiError::Unprocessable(other.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownAlias(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Unprocessable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid operator token".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "operator endpoints are disabled".to_string(),
            ),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::TooManyRequests(denial) => {
                let body = serde_json::json!({ "error": denial.to_string(), "denial": denial });
                return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], 4242))
    }

    #[test]
    fn test_client_origin_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.1.1.1"),
        );
        assert_eq!(client_origin(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn test_client_origin_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(client_origin(&headers, peer()), "10.0.0.7");
        assert_eq!(client_origin(&HeaderMap::new(), peer()), "10.0.0.7");
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(ApiState::bearer(&headers), None);
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(ApiState::bearer(&headers), Some("abc123"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(ApiState::bearer(&headers), None);
    }

    #[test]
    fn test_router_errors_map_to_status_codes() {
        let missing: ApiError = RouterError::UnknownVersion {
            scope: "org".into(),
            version: 9,
        }
        .into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
        let invalid: ApiError = RouterError::EmptyCatchAll.into();
        assert_eq!(
            invalid.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_registry_errors_map_to_status_codes() {
        let unknown: ApiError = RegistryError::UnknownAlias("x".into()).into();
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);
        let mismatch: ApiError = RegistryError::PatternMismatch {
            alias: "gpt-pro".into(),
            model: "claude".into(),
        }
        .into();
        assert_eq!(
            mismatch.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_auth_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
