//! Shared application state injected into every axum handler.

use std::sync::Arc;

use gateway_core::adapter::AdapterRegistry;
use gateway_core::channel_manager::ChannelManager;
use gateway_core::connection::ConnectionSupervisor;
use gateway_core::contracts::{Authorizer, ContainerService, Store};
use gateway_core::federation::FederationRouter;
use gateway_core::mcp::session_manager::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub containers: Arc<dyn ContainerService>,
    pub authorizer: Arc<dyn Authorizer>,
    pub registry: Arc<AdapterRegistry>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub channel_manager: Arc<ChannelManager>,
    pub session_manager: Arc<SessionManager>,
    pub federation: Arc<FederationRouter>,
}
