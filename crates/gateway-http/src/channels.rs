//! `/bots/:id/channel/:platform` CRUD and send endpoints (§6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gateway_protocol::{ChannelType, Message, OutboundMessage};
use serde::{Deserialize, Serialize};

use gateway_core::connection::handler_from;
use gateway_core::contracts::ChannelConfig;
use gateway_core::error::GatewayError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UpsertChannelRequest {
    pub credentials: HashMap<String, String>,
    pub external_identity: Option<String>,
    #[serde(default)]
    pub self_identity: HashMap<String, String>,
    #[serde(default)]
    pub routing: HashMap<String, String>,
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Serialize)]
pub struct ChannelConfigResponse {
    pub bot_id: String,
    pub channel_type: String,
    pub credentials: HashMap<String, String>,
    pub external_identity: Option<String>,
    pub self_identity: HashMap<String, String>,
    pub routing: HashMap<String, String>,
    pub capabilities: HashMap<String, bool>,
    pub disabled: bool,
}

impl From<ChannelConfig> for ChannelConfigResponse {
    fn from(config: ChannelConfig) -> Self {
        Self {
            bot_id: config.bot_id,
            channel_type: config.channel_type.as_str().to_string(),
            credentials: config.credentials,
            external_identity: config.external_identity,
            self_identity: config.self_identity,
            routing: config.routing,
            capabilities: config.capabilities,
            disabled: config.disabled,
        }
    }
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub disabled: bool,
}

#[derive(Deserialize)]
pub struct SendRequest {
    pub target: String,
    pub message: Message,
}

pub async fn upsert(
    State(state): State<Arc<AppState>>,
    Path((bot_id, platform)): Path<(String, String)>,
    Json(body): Json<UpsertChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = ChannelType::parse(&platform);
    let adapter = state.registry.get(&channel_type)?;
    let credentials = adapter.normalize_config(body.credentials).map_err(GatewayError::from)?;

    let config = ChannelConfig {
        bot_id: bot_id.clone(),
        channel_type: channel_type.clone(),
        credentials,
        external_identity: body.external_identity,
        self_identity: body.self_identity,
        routing: body.routing,
        capabilities: body.capabilities,
        disabled: body.disabled,
    };

    let stored = state.store.upsert_channel_config(config).await?;

    let handler_state = state.clone();
    let handler_adapter = adapter.clone();
    let handler_config = stored.clone();
    let handler = handler_from(move |inbound| {
        let state = handler_state.clone();
        let adapter = handler_adapter.clone();
        let config = handler_config.clone();
        tokio::spawn(async move {
            state
                .channel_manager
                .handle_inbound(adapter, config, inbound, tokio_util::sync::CancellationToken::new())
                .await;
        });
    });

    state.supervisor.apply_upsert(stored.clone(), handler).await?;

    Ok((StatusCode::OK, Json(ChannelConfigResponse::from(stored))))
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path((bot_id, platform)): Path<(String, String)>,
    Json(body): Json<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = ChannelType::parse(&platform);
    let existing = state
        .store
        .get_channel_config(&bot_id, &channel_type)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("{bot_id}/{platform}")))?;

    let mut updated = existing;
    updated.disabled = body.disabled;
    let stored = state.store.upsert_channel_config(updated).await?;

    if stored.disabled {
        state.supervisor.apply_delete(&bot_id, &channel_type).await;
    } else {
        let adapter = state.registry.get(&channel_type)?;
        let handler_state = state.clone();
        let handler_adapter = adapter.clone();
        let handler_config = stored.clone();
        let handler = handler_from(move |inbound| {
            let state = handler_state.clone();
            let adapter = handler_adapter.clone();
            let config = handler_config.clone();
            tokio::spawn(async move {
                state
                    .channel_manager
                    .handle_inbound(adapter, config, inbound, tokio_util::sync::CancellationToken::new())
                    .await;
            });
        });
        state.supervisor.apply_upsert(stored.clone(), handler).await?;
    }

    Ok((StatusCode::OK, Json(ChannelConfigResponse::from(stored))))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path((bot_id, platform)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = ChannelType::parse(&platform);
    state.store.delete_channel_config(&bot_id, &channel_type).await?;
    state.supervisor.apply_delete(&bot_id, &channel_type).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((bot_id, platform)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = ChannelType::parse(&platform);
    let config = state
        .store
        .get_channel_config(&bot_id, &channel_type)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("{bot_id}/{platform}")))?;
    Ok(Json(ChannelConfigResponse::from(config)))
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    Path((bot_id, platform)): Path<(String, String)>,
    Json(body): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = ChannelType::parse(&platform);
    let config = state
        .store
        .get_channel_config(&bot_id, &channel_type)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("{bot_id}/{platform}")))?;
    let adapter = state.registry.get(&channel_type)?;
    adapter
        .send(&config, OutboundMessage { target: body.target, message: body.message })
        .await
        .map_err(GatewayError::from)?;
    Ok(StatusCode::OK)
}
