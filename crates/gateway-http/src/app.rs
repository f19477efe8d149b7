//! Axum router assembly: channel admin API, webhook receiver, MCP tool gateway (§6).

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer;
use crate::state::AppState;
use crate::{channels, mcp_stdio, tool_gateway, webhook};

/// Max body size accepted anywhere except the webhook receiver, which enforces its own
/// (smaller) §4.5 cap explicitly.
const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let bots = Router::new()
        .route("/bots/:bot_id/channel/:platform", post(channels::upsert).get(channels::get).delete(channels::delete))
        .route("/bots/:bot_id/channel/:platform/status", patch(channels::set_status))
        .route("/bots/:bot_id/channel/:platform/send", post(channels::send))
        .route("/bots/:bot_id/tools", post(tool_gateway::handle))
        .route("/bots/:bot_id/mcp-stdio", post(mcp_stdio::create))
        .route("/bots/:bot_id/mcp-stdio/:session_id", post(mcp_stdio::proxy))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let webhooks = Router::new().route(
        "/channels/:platform/webhook/:config_id",
        get(webhook::probe).post(webhook::receive),
    );

    Router::new()
        .merge(bots)
        .merge(webhooks)
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
