//! Minimal standalone implementations of the `Store`/`ContainerService`/`Authorizer` contracts
//! (§1 "explicitly out of scope" — a real deployment wires a SQL-backed store and a container
//! runtime here instead). Good enough to run the gateway with no external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_core::contracts::{Asset, Blob, ChannelConfig, Container, ContainerService, Store, UserChannelBinding};
use gateway_core::error::GatewayError;
use gateway_core::mcp::transport::DuplexBytes;
use gateway_protocol::ChannelType;

/// Process-local, non-persistent `Store`. Restarting the process loses every channel binding;
/// fine for a single-node dev deployment, not for production (see DESIGN.md).
#[derive(Default)]
pub struct InMemoryStore {
    configs: Mutex<HashMap<(String, String), ChannelConfig>>,
}

fn config_key(bot_id: &str, channel_type: &ChannelType) -> (String, String) {
    (bot_id.to_string(), channel_type.as_str().to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_channel_config(
        &self,
        bot_id: &str,
        channel_type: &ChannelType,
    ) -> Result<Option<ChannelConfig>, GatewayError> {
        Ok(self.configs.lock().unwrap().get(&config_key(bot_id, channel_type)).cloned())
    }

    async fn list_channel_configs(&self, bot_id: &str) -> Result<Vec<ChannelConfig>, GatewayError> {
        Ok(self.configs.lock().unwrap().values().filter(|c| c.bot_id == bot_id).cloned().collect())
    }

    async fn upsert_channel_config(&self, config: ChannelConfig) -> Result<ChannelConfig, GatewayError> {
        let key = config_key(&config.bot_id, &config.channel_type);
        self.configs.lock().unwrap().insert(key, config.clone());
        Ok(config)
    }

    async fn delete_channel_config(&self, bot_id: &str, channel_type: &ChannelType) -> Result<(), GatewayError> {
        self.configs.lock().unwrap().remove(&config_key(bot_id, channel_type));
        Ok(())
    }

    async fn get_user_binding(
        &self,
        _user_id: &str,
        _channel_type: &ChannelType,
    ) -> Result<Option<UserChannelBinding>, GatewayError> {
        Ok(None)
    }

    async fn get_container(&self, _bot_id: &str) -> Result<Option<Container>, GatewayError> {
        Ok(None)
    }
}

/// Runs tool-worker commands directly on the host instead of inside a per-bot container —
/// the same host-exec fallback `SessionManager::spawn_local_stdio_session` documents for
/// deployments with no container runtime configured.
#[derive(Default)]
pub struct HostExecContainerService;

#[async_trait]
impl ContainerService for HostExecContainerService {
    async fn ensure_running(&self, bot_id: &str) -> Result<Container, GatewayError> {
        Ok(Container {
            bot_id: bot_id.to_string(),
            container_id: format!("host-exec:{bot_id}"),
            image: "host".to_string(),
            status: gateway_core::contracts::ContainerStatus::Running,
            namespace: "host".to_string(),
            host_path: String::new(),
            container_path: String::new(),
            auto_start: true,
        })
    }

    async fn stop(&self, _bot_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn delete(&self, _bot_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn exec_duplex(&self, _bot_id: &str, command: &str) -> Result<Box<dyn DuplexBytes>, GatewayError> {
        let (duplex, _child) = gateway_core::mcp::transport::spawn_stdio("sh", &["-c".to_string(), command.to_string()], &HashMap::new(), None)
            .map_err(|e| GatewayError::Fatal(format!("host exec `{command}` failed: {e}")))?;
        Ok(duplex)
    }
}

/// `Blob` with no backing store (§1 "explicitly out of scope" — a real deployment wires this to
/// object storage). Every `open` fails `NotFound`; attachments carried only by `content_hash`
/// cannot be delivered until a real blob store is configured, same as an unconfigured `FlowRunner`
/// drops every inbound message.
#[derive(Default)]
pub struct UnconfiguredBlob;

#[async_trait]
impl Blob for UnconfiguredBlob {
    async fn open(&self, bot_id: &str, content_hash: &str) -> Result<(Box<dyn std::io::Read + Send>, Asset), GatewayError> {
        Err(GatewayError::NotFound(format!("no blob store configured (bot_id={bot_id}, content_hash={content_hash})")))
    }
}

/// Single-token bearer `Authorizer`. A process started with no token configured rejects every
/// request rather than accepting an unauthenticated one.
pub struct StaticTokenAuthorizer {
    token: Option<String>,
}

impl StaticTokenAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl gateway_core::contracts::Authorizer for StaticTokenAuthorizer {
    async fn authorize(&self, bearer_token: &str) -> Result<String, GatewayError> {
        match &self.token {
            Some(expected) if expected == bearer_token => Ok("default".to_string()),
            _ => Err(GatewayError::Auth("invalid bearer token".to_string())),
        }
    }
}
