use crate::{state::ProxyState, ws};
use axum::{
    body::Bytes,
    extract::{
        connect_info::ConnectInfo,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        DefaultBodyLimit, FromRequestParts, Path, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gate_core::{
    types::{codes, new_error, parse_payload},
    upstream::{parse_quantity, HttpTransport, RequestContext, UpstreamTransport},
};
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

pub const BANNER: &str = "RPC Proxy Server";
pub const UNKNOWN_POST_ERROR: &str = "Unknown POST error";

const CORS_MAX_AGE: Duration = Duration::from_secs(1_728_000);

/// Builds the public router.
pub fn create_router(state: Arc<ProxyState>) -> Router {
    let max_body_size = state.config.server.max_body_size;

    Router::new()
        .route("/", get(handle_root))
        .route("/{chain}", get(handle_chain).post(handle_rpc))
        .route("/{chain}/health", get(handle_health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(CorsLayer::permissive().max_age(CORS_MAX_AGE))
        .with_state(state)
}

/// Client address used for rate limiting.
///
/// With `server.reverse_proxy` the first `X-Forwarded-For` entry wins, otherwise the
/// socket peer. Empty when neither is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

impl FromRequestParts<Arc<ProxyState>> for ClientOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ProxyState>,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = state
            .config
            .server
            .reverse_proxy
            .then(|| parts.headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let origin = match forwarded {
            Some(address) => address.to_string(),
            None => parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_default(),
        };

        Ok(Self(origin))
    }
}

fn banner_or_redirect(state: &ProxyState) -> Response {
    match &state.config.server.redirect {
        Some(location) => (StatusCode::FOUND, [(header::LOCATION, location.clone())]).into_response(),
        None => BANNER.into_response(),
    }
}

fn unknown_chain(chain: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Unknown chain {chain}")).into_response()
}

async fn handle_root(State(state): State<Arc<ProxyState>>) -> Response {
    banner_or_redirect(&state)
}

/// `GET /{chain}`: upgrades WebSocket clients, answers everything else with the banner.
async fn handle_chain(
    State(state): State<Arc<ProxyState>>,
    Path(chain): Path<String>,
    ClientOrigin(origin): ClientOrigin,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(backend) = state.backend(&chain) else {
        return unknown_chain(&chain);
    };

    match upgrade {
        Ok(upgrade) => upgrade
            .max_message_size(state.config.server.max_body_size)
            .on_upgrade(move |socket| ws::serve_session(socket, state, backend, origin)),
        Err(_) => banner_or_redirect(&state),
    }
}

/// `POST /{chain}`: filters and forwards one JSON-RPC payload.
async fn handle_rpc(
    State(state): State<Arc<ProxyState>>,
    Path(chain): Path<String>,
    ClientOrigin(origin): ClientOrigin,
    body: Bytes,
) -> Response {
    let Some(backend) = state.backend(&chain) else {
        return unknown_chain(&chain);
    };

    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(chain = %chain, origin = %origin, error = %e, "invalid request body");
            return (StatusCode::BAD_REQUEST, Json(new_error(codes::INVALID_REQUEST, "Invalid request")))
                .into_response();
        }
    };

    let transport = HttpTransport::new(state.context(backend, &origin), state.client.clone());
    match tokio::spawn(async move { transport.send(payload).await }).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!(chain = %chain, error = %e, "request handler failed");
            Json(new_error(codes::INTERNAL_ERROR, UNKNOWN_POST_ERROR)).into_response()
        }
    }
}

/// `GET /{chain}/health`: latest block, 200 while it is younger than `healthy_age_seconds`.
async fn handle_health(State(state): State<Arc<ProxyState>>, Path(chain): Path<String>) -> Response {
    let Some(backend) = state.backend(&chain) else {
        return unknown_chain(&chain);
    };

    let transport = HttpTransport::new(RequestContext::new(backend), state.client.clone());
    match transport.get_block().await {
        Ok(block) => {
            let status = if is_healthy(&block, state.config.server.healthy_age_seconds, now_seconds()) {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (status, Json(block)).into_response()
        }
        Err(e) => {
            tracing::debug!(chain = %chain, error = %e, "health check failed");
            (StatusCode::BAD_GATEWAY, Json(json!({"error": "Unknown /health error"}))).into_response()
        }
    }
}

fn now_seconds() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// A block is healthy while `timestamp + healthy_age > now`. Missing timestamps count as `0`.
fn is_healthy(block: &Value, healthy_age: u64, now: u64) -> bool {
    let timestamp = block.get("timestamp").and_then(parse_quantity).unwrap_or(0);
    timestamp.saturating_add(healthy_age) > now
}
