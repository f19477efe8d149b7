//! Process entrypoint: load configuration, install logging, seed the adapter registry, build the
//! HTTP surface, and serve it until shutdown (§6 Environment, §L1-L6 System Overview).

mod cli;
mod local;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use gateway_core::adapter::AdapterRegistry;
use gateway_core::channel_manager::ChannelManager;
use gateway_core::connection::ConnectionSupervisor;
use gateway_core::contracts::FlowRunner;
use gateway_core::error::GatewayError;
use gateway_core::federation::FederationRouter;
use gateway_core::mcp::session_manager::SessionManager;
use gateway_http::AppState;

/// No LLM chat engine is wired into this process (§1: "the LLM chat engine" is an external
/// collaborator). A deployment that wants flow execution replaces this with a real `FlowRunner`.
struct UnconfiguredFlowRunner;

#[async_trait::async_trait]
impl FlowRunner for UnconfiguredFlowRunner {
    async fn run(
        &self,
        inbound: gateway_protocol::InboundMessage,
    ) -> Result<std::pin::Pin<Box<dyn tokio_stream::Stream<Item = gateway_protocol::StreamEvent> + Send>>, GatewayError> {
        tracing::warn!(target: "gateway", bot_id = %inbound.bot_id, "no FlowRunner configured, dropping inbound message");
        Err(GatewayError::Fatal("no FlowRunner configured".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = cli::Args::parse();

    gateway_config::load_and_apply("gateway", args.config_dir.as_deref())?;

    let _log_guard = gateway_config::logging::init(gateway_config::logging::LoggingOptions {
        json: args.log_json,
        file_dir: args.log_dir.as_deref(),
    })?;

    if args.bearer_token.is_none() {
        tracing::warn!(target: "gateway", "no GATEWAY_BEARER_TOKEN configured, every request will be rejected");
    }

    let registry = Arc::new(AdapterRegistry::new());
    gateway_adapters::register_builtin_adapters(&registry, Arc::new(local::UnconfiguredBlob));

    let containers = Arc::new(local::HostExecContainerService::default());
    let session_manager = Arc::new(SessionManager::new(containers.clone()));

    let state = Arc::new(AppState {
        store: Arc::new(local::InMemoryStore::default()),
        containers,
        authorizer: Arc::new(local::StaticTokenAuthorizer::new(args.bearer_token)),
        registry: registry.clone(),
        supervisor: Arc::new(ConnectionSupervisor::new(registry)),
        channel_manager: Arc::new(ChannelManager::new(Arc::new(UnconfiguredFlowRunner))),
        session_manager: session_manager.clone(),
        federation: Arc::new(FederationRouter::new(session_manager)),
    });

    let app = gateway_http::router(state);
    let listener = TcpListener::bind(&args.bind).await?;
    info!(target: "gateway", addr = %args.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "gateway", "shutdown signal received");
        })
        .await?;

    Ok(())
}
