//! Session HTTP Facade (C8, spec.md §4.8): the Streamable HTTP surface.
//!
//! Wires the dispatcher, session store, and C4 auth resolver to
//! `POST/GET/DELETE /mcp`, `/health`, and the OAuth 2.1 endpoints from
//! `mcpgate_auth::OAuthEngine`. CORS preflight policy and discovery document
//! shapes beyond §6 are a collaborator's problem (spec.md §1); this module
//! only implements the request lifecycle the spec actually pins down.

use crate::config::ServerSettings;
use crate::discovery::{authorization_server_metadata, health_body, protected_resource_metadata};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json};
use futures::stream::{self, StreamExt};
use mcpgate_auth::oauth::{AuthorizeInput, CallbackQuery, RegisterRequest, TokenGrant};
use mcpgate_auth::resolver::{AuthConfig, AuthStrategy, RsTokenStatus, resolve};
use mcpgate_auth::{OAuthEngine, Refresher, TokenStore};
use mcpgate_core::{ErrorKind, GateError};
use mcpgate_protocol::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use mcpgate_protocol::versions::any_version_supported;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::request_context::ContextRegistry;
use crate::session::{SessionStore, new_session_id};

/// Everything a request handler needs; one instance shared across the
/// listener (spec.md §4.8, §4.4).
pub struct FacadeState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
    pub contexts: Arc<ContextRegistry>,
    pub auth_config: Arc<AuthConfig>,
    pub token_store: Arc<dyn TokenStore>,
    pub refresher: Arc<Refresher>,
    pub oauth_engine: Arc<OAuthEngine>,
    pub settings: Arc<ServerSettings>,
}

pub fn router(state: Arc<FacadeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata_handler))
        .route("/.well-known/oauth-protected-resource", get(protected_resource_metadata_handler))
        .route("/authorize", get(authorize_handler))
        .route("/oauth/callback", get(callback_handler))
        .route("/token", post(token_handler))
        .route("/register", post(register_handler))
        .route("/revoke", post(revoke_handler))
        .route("/mcp", get(mcp_get).post(mcp_post).delete(mcp_delete))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(health_body())
}

#[derive(Debug, Deserialize)]
struct SidParam {
    sid: Option<String>,
}

async fn authorization_server_metadata_handler(State(state): State<Arc<FacadeState>>) -> Json<Value> {
    Json(authorization_server_metadata(&state.settings.origin()))
}

async fn protected_resource_metadata_handler(State(state): State<Arc<FacadeState>>, Query(params): Query<SidParam>) -> Json<Value> {
    Json(protected_resource_metadata(&state.settings.origin(), None, params.sid.as_deref()))
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: String,
    code_challenge: String,
    code_challenge_method: String,
    state: Option<String>,
    scope: Option<String>,
    sid: Option<String>,
}

async fn authorize_handler(State(state): State<Arc<FacadeState>>, Query(params): Query<AuthorizeParams>) -> Response {
    let input = AuthorizeInput {
        client_id: params.client_id,
        redirect_uri: params.redirect_uri,
        code_challenge: params.code_challenge,
        code_challenge_method: params.code_challenge_method,
        state: params.state,
        scope: params.scope,
        sid: params.sid,
    };
    match state.oauth_engine.authorize(input).await {
        Ok(outcome) => Redirect::to(&outcome.redirect_to).into_response(),
        Err(e) => oauth_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: String,
    state: String,
}

async fn callback_handler(State(state): State<Arc<FacadeState>>, Query(params): Query<CallbackParams>) -> Response {
    let query = CallbackQuery {
        code: params.code,
        state: params.state,
    };
    match state.oauth_engine.handle_callback(query).await {
        Ok(outcome) => Redirect::to(&outcome.redirect_to).into_response(),
        Err(e) => oauth_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
}

async fn token_handler(State(state): State<Arc<FacadeState>>, Form(form): Form<TokenForm>) -> Response {
    let grant = match form.grant_type.as_str() {
        "authorization_code" => match (form.code, form.code_verifier) {
            (Some(code), Some(code_verifier)) => TokenGrant::AuthorizationCode { code, code_verifier },
            _ => return oauth_error_body(StatusCode::BAD_REQUEST, "invalid_request", "code and code_verifier are required"),
        },
        "refresh_token" => match form.refresh_token {
            Some(refresh_token) => TokenGrant::RefreshToken { refresh_token },
            None => return oauth_error_body(StatusCode::BAD_REQUEST, "invalid_request", "refresh_token is required"),
        },
        other => return oauth_error_body(StatusCode::BAD_REQUEST, "unsupported_grant_type", &format!("unsupported grant_type: {other}")),
    };

    match state.oauth_engine.token(grant).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => oauth_error_response(&e),
    }
}

async fn register_handler(State(state): State<Arc<FacadeState>>, Json(request): Json<RegisterRequest>) -> Response {
    Json(state.oauth_engine.register(request)).into_response()
}

async fn revoke_handler(State(state): State<Arc<FacadeState>>) -> StatusCode {
    state.oauth_engine.revoke();
    StatusCode::OK
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// spec.md §4.8 step 4 fingerprint order: explicit `API-Key` header,
/// `x-api-key`, `x-auth-token`, the bearer token carried on `Authorization`,
/// the raw `Authorization` value, the configured `API_KEY`, else `"public"`.
fn api_key_fingerprint(headers: &HeaderMap, configured: Option<&str>) -> String {
    if let Some(v) = header_str(headers, "api-key") {
        return v.to_string();
    }
    if let Some(v) = header_str(headers, "x-api-key") {
        return v.to_string();
    }
    if let Some(v) = header_str(headers, "x-auth-token") {
        return v.to_string();
    }
    if let Some(auth) = header_str(headers, "authorization") {
        if let Some(bearer) = auth.strip_prefix("Bearer ") {
            return bearer.to_string();
        }
        return auth.to_string();
    }
    if let Some(configured) = configured {
        return configured.to_string();
    }
    "public".to_string()
}

/// spec.md §4.8 step 6: reject a cross-origin browser request in production
/// when `Origin` doesn't match the request's own `Host`. Loopback/dev is
/// left alone since there's no browser-trust boundary to protect there.
fn origin_is_acceptable(headers: &HeaderMap, settings: &ServerSettings) -> bool {
    if !settings.is_production {
        return true;
    }
    let Some(origin) = header_str(headers, "origin") else {
        return true;
    };
    let Some(host) = header_str(headers, "host") else {
        return true;
    };
    origin.trim_end_matches('/').ends_with(host)
}

/// spec.md §7/§9: missing credential or an unresolvable RS token challenges
/// under `AUTH_REQUIRE_RS` — unless an API-key-shaped header is present, in
/// which case the challenge check never looks past it (the ambiguity
/// spec.md's Open Questions calls out; see DESIGN.md).
fn should_challenge(auth_config: &AuthConfig, rs_token_status: RsTokenStatus, headers: &HeaderMap, is_initialize: bool) -> bool {
    if auth_config.strategy != Some(AuthStrategy::OAuth) || !auth_config.require_rs || is_initialize {
        return false;
    }
    let has_api_key_header = header_str(headers, "x-api-key").is_some() || header_str(headers, "x-auth-token").is_some();
    let rs_token_missing_or_unresolved = matches!(rs_token_status, RsTokenStatus::Absent | RsTokenStatus::Unresolved);
    rs_token_missing_or_unresolved && !has_api_key_header
}

fn jsonrpc_error_response(status: StatusCode, code: i32, message: &str, session_id: Option<&str>) -> Response {
    let resp = JsonRpcResponse::error_response(JsonRpcError::new(code, message), None);
    let mut response = (status, Json(resp)).into_response();
    if let Some(sid) = session_id {
        response.headers_mut().insert("mcp-session-id", HeaderValue::from_str(sid).expect("session id is a valid header value"));
    }
    response
}

fn unauthorized_challenge(state: &FacadeState, session_id: &str) -> Response {
    let authorization_uri = format!("{}/.well-known/oauth-protected-resource?sid={session_id}", state.settings.origin());
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(JsonRpcResponse::error_response(JsonRpcError::new(-32000, "Unauthorized"), None)),
    )
        .into_response();
    let challenge = format!(r#"Bearer realm="MCP", authorization_uri="{authorization_uri}""#);
    response.headers_mut().insert("www-authenticate", HeaderValue::from_str(&challenge).expect("challenge has no control characters"));
    response.headers_mut().insert("mcp-session-id", HeaderValue::from_str(session_id).expect("session id is a valid header value"));
    response
}

fn oauth_error_response(err: &GateError) -> Response {
    oauth_error_body(
        if matches!(err.kind(), ErrorKind::Unauthorized) { StatusCode::UNAUTHORIZED } else { StatusCode::BAD_REQUEST },
        err.oauth_error(),
        err.message(),
    )
}

fn oauth_error_body(status: StatusCode, error: &str, description: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error, "error_description": description }))).into_response()
}

/// `POST /mcp` (spec.md §4.8 step 1-7): parse the batch, resolve/create the
/// session, resolve auth via C4, dispatch every item, and tear down each
/// item's request context inside `Dispatcher::dispatch` itself.
async fn mcp_post(State(state): State<Arc<FacadeState>>, headers: HeaderMap, body: Bytes) -> Response {
    let message: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => return jsonrpc_error_response(StatusCode::BAD_REQUEST, -32700, &format!("Parse error: {e}"), None),
    };
    let requests: Vec<JsonRpcRequest> = match message {
        JsonRpcMessage::Single(r) => vec![r],
        JsonRpcMessage::Batch(items) => items,
    };
    let is_initialize = requests.iter().any(|r| r.method == "initialize");

    let header_session_id = header_str(&headers, "mcp-session-id").map(str::to_string);
    if header_session_id.is_none() && !is_initialize {
        return jsonrpc_error_response(StatusCode::BAD_REQUEST, -32000, "Mcp-Session-Id required", None);
    }

    if let Some(pv) = header_str(&headers, "mcp-protocol-version")
        && !any_version_supported(pv)
    {
        return jsonrpc_error_response(StatusCode::BAD_REQUEST, -32600, "unsupported Mcp-Protocol-Version", header_session_id.as_deref());
    }

    if !origin_is_acceptable(&headers, &state.settings) {
        return jsonrpc_error_response(StatusCode::FORBIDDEN, -32000, "Origin not allowed", header_session_id.as_deref());
    }

    let session_id = header_session_id.clone().unwrap_or_else(new_session_id);
    let fingerprint = api_key_fingerprint(&headers, state.auth_config.api_key.as_deref());
    let mut session_exists = false;

    if let Some(existing) = state.sessions.get(&session_id) {
        session_exists = true;
        match &existing.api_key {
            Some(bound) if bound != &fingerprint => {
                tracing::warn!(session_id = %session_id, "api key fingerprint mismatch, serving existing soft-bound session");
            }
            _ => state.sessions.bind_api_key_if_unset(&session_id, &fingerprint),
        }
    } else if !is_initialize {
        return jsonrpc_error_response(StatusCode::NOT_FOUND, -32000, "Invalid session", None);
    }

    let auth = resolve(&headers, &state.auth_config, state.token_store.as_ref(), &state.refresher).await;

    if should_challenge(&state.auth_config, auth.rs_token_status, &headers, is_initialize) {
        return unauthorized_challenge(&state, &session_id);
    }

    let mut responses = Vec::new();
    for request in requests {
        let dispatch_session = if request.method == "initialize" && !session_exists { None } else { Some(session_id.clone()) };
        if let DispatchOutcome::Response(resp) = state.dispatcher.dispatch(request, dispatch_session, auth.clone()).await {
            responses.push(resp);
        }
    }

    // spec.md §4.8 step 3: defer session creation until the transport has
    // confirmed initialization, i.e. the response for this call is ready.
    if is_initialize && !session_exists {
        state.sessions.create(session_id.clone(), Some(fingerprint));
    }

    if responses.is_empty() {
        let mut response = StatusCode::ACCEPTED.into_response();
        response.headers_mut().insert("mcp-session-id", HeaderValue::from_str(&session_id).expect("session id is a valid header value"));
        return response;
    }

    let body = if responses.len() == 1 {
        serde_json::to_value(&responses[0]).expect("response serializes")
    } else {
        serde_json::to_value(&responses).expect("responses serialize")
    };
    let mut response = Json(body).into_response();
    response.headers_mut().insert("mcp-session-id", HeaderValue::from_str(&session_id).expect("session id is a valid header value"));
    response
}

/// `GET /mcp`: 405 without a session header, 404 for an unknown session,
/// else a minimal SSE stream. The actual event-pushing transport this
/// stream feeds is HTTP framework plumbing out of scope here (spec.md §1);
/// this only satisfies the session-validation half of the contract.
async fn mcp_get(State(state): State<Arc<FacadeState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, "mcp-session-id").map(str::to_string) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    if state.sessions.get(&session_id).is_none() {
        return jsonrpc_error_response(StatusCode::NOT_FOUND, -32000, "Invalid session", None);
    }

    let endpoint = stream::once(async { Ok::<_, Infallible>(Event::default().event("endpoint").data("/mcp")) });
    let idle = stream::pending::<Result<Event, Infallible>>();
    let events = endpoint.chain(idle);
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))).into_response()
}

/// `DELETE /mcp`: close out the session and everything keyed to it
/// (spec.md §4.8).
async fn mcp_delete(State(state): State<Arc<FacadeState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, "mcp-session-id").map(str::to_string) else {
        return jsonrpc_error_response(StatusCode::BAD_REQUEST, -32000, "Mcp-Session-Id required", None);
    };
    if !state.sessions.delete(&session_id) {
        return jsonrpc_error_response(StatusCode::NOT_FOUND, -32000, "Invalid session", None);
    }
    state.contexts.delete_by_session(&session_id);
    StatusCode::NO_CONTENT.into_response()
}
