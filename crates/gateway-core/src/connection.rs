//! Owns one live `Connection` per `ChannelConfig`: starts it on upsert/enable, stops it on
//! disable/delete, and restarts it after the client loop returns (§L5, §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use gateway_protocol::{ChannelType, InboundMessage};

use crate::adapter::{AdapterRegistry, Connection, InboundHandler};
use crate::contracts::ChannelConfig;
use crate::error::GatewayError;

/// Delay between a client loop returning and the supervisor restarting it (§4.9: "~3 s").
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

fn config_key(bot_id: &str, channel_type: &ChannelType) -> String {
    format!("{bot_id}:{}", channel_type.as_str())
}

struct Supervised {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Supervises the set of running connections across all bots/channels (§L5).
pub struct ConnectionSupervisor {
    registry: Arc<AdapterRegistry>,
    running: Mutex<HashMap<String, Supervised>>,
}

impl ConnectionSupervisor {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry, running: Mutex::new(HashMap::new()) }
    }

    /// Applies a config upsert: starts the connection unless `disabled`, restarting it if one was
    /// already running for this key (§4.9).
    pub async fn apply_upsert(
        &self,
        config: ChannelConfig,
        handler: InboundHandler,
    ) -> Result<(), GatewayError> {
        let key = config_key(&config.bot_id, &config.channel_type);
        self.stop_key(&key).await;
        if config.disabled {
            return Ok(());
        }
        self.start(key, config, handler).await
    }

    pub async fn apply_delete(&self, bot_id: &str, channel_type: &ChannelType) {
        self.stop_key(&config_key(bot_id, channel_type)).await;
    }

    async fn start(
        &self,
        key: String,
        config: ChannelConfig,
        handler: InboundHandler,
    ) -> Result<(), GatewayError> {
        let adapter = self.registry.get(&config.channel_type)?;
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let bot_id = config.bot_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => break,
                    result = adapter.connect(config.clone(), handler.clone()) => {
                        match result {
                            Ok(connection) => {
                                // The adapter's own connect() blocks/loops internally per its
                                // platform SDK; once it returns, the connection has dropped.
                                let _ = connection.stop(&loop_cancel).await;
                            }
                            Err(err) => {
                                tracing::warn!(target: "connection", bot_id = %bot_id, %err, "connect failed");
                            }
                        }
                    }
                }
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        });

        self.running.lock().await.insert(key, Supervised { cancel, task });
        Ok(())
    }

    async fn stop_key(&self, key: &str) {
        if let Some(supervised) = self.running.lock().await.remove(key) {
            supervised.cancel.cancel();
            supervised.task.abort();
        }
    }

    pub async fn is_running(&self, bot_id: &str, channel_type: &ChannelType) -> bool {
        self.running.lock().await.contains_key(&config_key(bot_id, channel_type))
    }

    /// Stops every supervised connection (process shutdown, §9 "explicit teardown").
    pub async fn stop_all(&self) {
        let mut running = self.running.lock().await;
        for (_, supervised) in running.drain() {
            supervised.cancel.cancel();
            supervised.task.abort();
        }
    }
}

/// Adapts a `ChannelManager` dispatch closure into the `InboundHandler` shape adapters invoke.
pub fn handler_from(dispatch: impl Fn(InboundMessage) + Send + Sync + 'static) -> InboundHandler {
    Arc::new(dispatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_key_combines_bot_and_channel() {
        assert_eq!(config_key("bot-1", &ChannelType::Guild), "bot-1:guild");
    }
}
