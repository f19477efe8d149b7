//! Built-in channel adapters, registered into a `gateway_core::adapter::AdapterRegistry`.

pub mod enterprise_im;
pub mod guild;

pub use enterprise_im::EnterpriseImAdapter;
pub use guild::GuildAdapter;

use std::sync::Arc;

use gateway_core::adapter::AdapterRegistry;
use gateway_core::contracts::Blob;

/// Registers every built-in adapter under its `ChannelType`. Platform-specific crates can
/// register additional adapters into the same registry afterward.
pub fn register_builtin_adapters(registry: &AdapterRegistry, blob: Arc<dyn Blob>) {
    registry.register(Arc::new(EnterpriseImAdapter::new(blob)));
    registry.register(Arc::new(GuildAdapter::default()));
}
