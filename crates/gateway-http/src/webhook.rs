//! Platform webhook callback: size-capped body, two-tier auth, shared normalization (§4.5).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use gateway_protocol::ChannelType;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const SIGNATURE_HEADER: &str = "x-signature";

pub async fn probe() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path((platform, config_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if body.len() > MAX_BODY_BYTES {
        return (StatusCode::PAYLOAD_TOO_LARGE, "body too large").into_response();
    }

    let channel_type = ChannelType::parse(&platform);
    let config = match state.store.get_channel_config(&config_id, &channel_type).await {
        Ok(Some(c)) => c,
        Ok(None) => return (StatusCode::NOT_FOUND, "unknown channel config").into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, err.to_string()).into_response();
        }
    };

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid json body").into_response(),
    };

    if let Some(encrypt_key) = config.credentials.get("encrypt_key") {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !verify_hmac_signature(encrypt_key, &body, signature) {
            return (StatusCode::UNAUTHORIZED, "signature mismatch").into_response();
        }
    } else if parsed.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        let challenge = parsed.get("challenge").cloned().unwrap_or(Value::Null);
        return Json(serde_json::json!({"challenge": challenge})).into_response();
    } else {
        let configured_token = match config.credentials.get("verification_token") {
            Some(t) if !t.is_empty() => t.clone(),
            _ => return (StatusCode::FORBIDDEN, "no verification token configured").into_response(),
        };
        let request_token = parsed
            .get("header")
            .and_then(|h| h.get("token"))
            .and_then(|v| v.as_str())
            .or_else(|| parsed.get("token").and_then(|v| v.as_str()))
            .unwrap_or_default();
        if request_token != configured_token {
            return (StatusCode::UNAUTHORIZED, "verification token mismatch").into_response();
        }
    }

    let adapter = match state.registry.get(&channel_type) {
        Ok(a) => a,
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, err.to_string()).into_response();
        }
    };

    let self_identity = if config.self_identity.is_empty() {
        adapter.discover_self(&config.credentials).await.map(|(identity, _)| identity).unwrap_or_else(|_| config.self_identity.clone())
    } else {
        config.self_identity.clone()
    };

    let inbound = match adapter.decode_webhook_event(&config_id, &self_identity, &parsed) {
        Ok(Some(inbound)) => inbound,
        Ok(None) => return StatusCode::OK.into_response(),
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let manager = state.channel_manager.clone();
    let cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn(async move {
        manager.handle_inbound(adapter, config, inbound, cancel).await;
    });

    StatusCode::OK.into_response()
}

/// HMAC-SHA256 over the raw body, constant-time compared against the hex-decoded signature header.
fn verify_hmac_signature(key: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else { return false };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let Ok(provided) = hex::decode(signature_hex) else { return false };
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_rejects_wrong_length() {
        assert!(!verify_hmac_signature("k", b"body", "00"));
    }

    #[test]
    fn signature_verification_accepts_matching_mac() {
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"payload");
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_hmac_signature("secret", b"payload", &sig));
    }
}
