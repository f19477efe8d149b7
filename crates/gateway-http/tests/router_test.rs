//! Exercises the assembled router end-to-end via `tower::ServiceExt::oneshot`, against fake
//! `Store`/`ContainerService`/`Authorizer`/`FlowRunner` collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use gateway_core::adapter::AdapterRegistry;
use gateway_core::channel_manager::ChannelManager;
use gateway_core::connection::ConnectionSupervisor;
use gateway_core::contracts::{Asset, Authorizer, Blob, ChannelConfig, Container, ContainerService, FlowRunner, Store, UserChannelBinding};
use gateway_core::error::GatewayError;
use gateway_core::federation::FederationRouter;
use gateway_core::mcp::session_manager::SessionManager;
use gateway_core::mcp::transport::DuplexBytes;
use gateway_protocol::{ChannelType, InboundMessage, StreamEvent};
use gateway_http::AppState;

const VALID_TOKEN: &str = "test-bearer-token";

#[derive(Default)]
struct FakeStore {
    configs: Mutex<HashMap<(String, String), ChannelConfig>>,
}

fn key(bot_id: &str, channel_type: &ChannelType) -> (String, String) {
    (bot_id.to_string(), channel_type.as_str().to_string())
}

#[async_trait::async_trait]
impl Store for FakeStore {
    async fn get_channel_config(&self, bot_id: &str, channel_type: &ChannelType) -> Result<Option<ChannelConfig>, GatewayError> {
        Ok(self.configs.lock().unwrap().get(&key(bot_id, channel_type)).cloned())
    }

    async fn list_channel_configs(&self, bot_id: &str) -> Result<Vec<ChannelConfig>, GatewayError> {
        Ok(self.configs.lock().unwrap().values().filter(|c| c.bot_id == bot_id).cloned().collect())
    }

    async fn upsert_channel_config(&self, config: ChannelConfig) -> Result<ChannelConfig, GatewayError> {
        let k = key(&config.bot_id, &config.channel_type);
        self.configs.lock().unwrap().insert(k, config.clone());
        Ok(config)
    }

    async fn delete_channel_config(&self, bot_id: &str, channel_type: &ChannelType) -> Result<(), GatewayError> {
        self.configs.lock().unwrap().remove(&key(bot_id, channel_type));
        Ok(())
    }

    async fn get_user_binding(&self, _user_id: &str, _channel_type: &ChannelType) -> Result<Option<UserChannelBinding>, GatewayError> {
        Ok(None)
    }

    async fn get_container(&self, _bot_id: &str) -> Result<Option<Container>, GatewayError> {
        Ok(None)
    }
}

struct FakeContainerService;

#[async_trait::async_trait]
impl ContainerService for FakeContainerService {
    async fn ensure_running(&self, bot_id: &str) -> Result<Container, GatewayError> {
        Ok(Container {
            bot_id: bot_id.to_string(),
            container_id: "c1".to_string(),
            image: "gateway/runtime".to_string(),
            status: gateway_core::contracts::ContainerStatus::Running,
            namespace: "default".to_string(),
            host_path: "/tmp".to_string(),
            container_path: "/data".to_string(),
            auto_start: true,
        })
    }

    async fn stop(&self, _bot_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn delete(&self, _bot_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn exec_duplex(&self, _bot_id: &str, _command: &str) -> Result<Box<dyn DuplexBytes>, GatewayError> {
        Err(GatewayError::Fatal("no container runtime in tests".to_string()))
    }
}

struct FakeAuthorizer;

#[async_trait::async_trait]
impl Authorizer for FakeAuthorizer {
    async fn authorize(&self, bearer_token: &str) -> Result<String, GatewayError> {
        if bearer_token == VALID_TOKEN {
            Ok("identity-1".to_string())
        } else {
            Err(GatewayError::Auth("unknown bearer token".to_string()))
        }
    }
}

struct FakeBlob;

#[async_trait::async_trait]
impl Blob for FakeBlob {
    async fn open(&self, bot_id: &str, content_hash: &str) -> Result<(Box<dyn std::io::Read + Send>, Asset), GatewayError> {
        Err(GatewayError::NotFound(format!("no blob store configured (bot_id={bot_id}, content_hash={content_hash})")))
    }
}

struct FakeFlowRunner;

#[async_trait::async_trait]
impl FlowRunner for FakeFlowRunner {
    async fn run(&self, _inbound: InboundMessage) -> Result<std::pin::Pin<Box<dyn tokio_stream::Stream<Item = StreamEvent> + Send>>, GatewayError> {
        Ok(Box::pin(tokio_stream::empty()))
    }
}

fn test_app() -> (axum::Router, Arc<FakeStore>) {
    let store = Arc::new(FakeStore::default());
    let registry = Arc::new(AdapterRegistry::new());
    gateway_adapters::register_builtin_adapters(&registry, Arc::new(FakeBlob));

    let state = Arc::new(AppState {
        store: store.clone(),
        containers: Arc::new(FakeContainerService),
        authorizer: Arc::new(FakeAuthorizer),
        registry: registry.clone(),
        supervisor: Arc::new(ConnectionSupervisor::new(registry.clone())),
        channel_manager: Arc::new(ChannelManager::new(Arc::new(FakeFlowRunner))),
        session_manager: Arc::new(SessionManager::new(Arc::new(FakeContainerService))),
        federation: Arc::new(FederationRouter::new(Arc::new(SessionManager::new(Arc::new(FakeContainerService))))),
    });

    (gateway_http::router(state), store)
}

fn enterprise_credentials() -> serde_json::Value {
    serde_json::json!({
        "credentials": {"app_id": "cli_1", "app_secret": "secret", "verification_token": "tok-123"},
        "external_identity": null,
        "self_identity": {"open_id": "ou_self"},
        "routing": {},
        "capabilities": {},
        "disabled": false
    })
}

#[tokio::test]
async fn channel_upsert_get_delete_round_trip() {
    let (app, _store) = test_app();

    let upsert = Request::builder()
        .method("POST")
        .uri("/bots/bot-1/channel/enterprise_im")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(enterprise_credentials().to_string()))
        .unwrap();
    let response = app.clone().oneshot(upsert).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let get = Request::builder()
        .method("GET")
        .uri("/bots/bot-1/channel/enterprise_im")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["bot_id"], "bot-1");
    assert_eq!(parsed["channel_type"], "enterprise_im");

    let delete = Request::builder()
        .method("DELETE")
        .uri("/bots/bot-1/channel/enterprise_im")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let get_again = Request::builder()
        .method("GET")
        .uri("/bots/bot-1/channel/enterprise_im")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get_again).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn channel_routes_reject_missing_bearer() {
    let (app, _store) = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/bots/bot-1/channel/enterprise_im")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_route_requires_no_bearer_but_rejects_oversized_body() {
    let (app, store) = test_app();
    let config = ChannelConfig {
        bot_id: "bot-1".to_string(),
        channel_type: ChannelType::EnterpriseIm,
        credentials: HashMap::from([("app_id".to_string(), "cli_1".to_string()), ("app_secret".to_string(), "secret".to_string())]),
        external_identity: None,
        self_identity: HashMap::from([("open_id".to_string(), "ou_self".to_string())]),
        routing: HashMap::new(),
        capabilities: HashMap::new(),
        disabled: false,
    };
    store.upsert_channel_config(config).await.unwrap();

    // One byte past the 1 MiB cap.
    let oversized = vec![b'a'; 1024 * 1024 + 1];
    let request = Request::builder()
        .method("POST")
        .uri("/channels/enterprise_im/webhook/bot-1")
        .header("content-type", "application/octet-stream")
        .body(Body::from(oversized))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn webhook_url_verification_echoes_challenge() {
    let (app, store) = test_app();
    let config = ChannelConfig {
        bot_id: "bot-1".to_string(),
        channel_type: ChannelType::EnterpriseIm,
        credentials: HashMap::from([("app_id".to_string(), "cli_1".to_string()), ("app_secret".to_string(), "secret".to_string())]),
        external_identity: None,
        self_identity: HashMap::from([("open_id".to_string(), "ou_self".to_string())]),
        routing: HashMap::new(),
        capabilities: HashMap::new(),
        disabled: false,
    };
    store.upsert_channel_config(config).await.unwrap();

    let body = serde_json::json!({"type": "url_verification", "challenge": "echo-me"});
    let request = Request::builder()
        .method("POST")
        .uri("/channels/enterprise_im/webhook/bot-1")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["challenge"], "echo-me");
}

#[tokio::test]
async fn webhook_rejects_wrong_verification_token() {
    let (app, store) = test_app();
    let config = ChannelConfig {
        bot_id: "bot-1".to_string(),
        channel_type: ChannelType::EnterpriseIm,
        credentials: HashMap::from([
            ("app_id".to_string(), "cli_1".to_string()),
            ("app_secret".to_string(), "secret".to_string()),
            ("verification_token".to_string(), "correct-token".to_string()),
        ]),
        external_identity: None,
        self_identity: HashMap::from([("open_id".to_string(), "ou_self".to_string())]),
        routing: HashMap::new(),
        capabilities: HashMap::new(),
        disabled: false,
    };
    store.upsert_channel_config(config).await.unwrap();

    let body = serde_json::json!({"token": "wrong-token", "event": {}});
    let request = Request::builder()
        .method("POST")
        .uri("/channels/enterprise_im/webhook/bot-1")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tool_gateway_notification_gets_no_body_response() {
    let (app, _store) = test_app();
    let body = serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let request = Request::builder()
        .method("POST")
        .uri("/bots/bot-1/tools")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn tool_gateway_list_tools_returns_empty_when_no_sources_registered() {
    let (app, _store) = test_app();
    let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
    let request = Request::builder()
        .method("POST")
        .uri("/bots/bot-1/tools")
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["result"]["tools"], serde_json::json!([]));
}
