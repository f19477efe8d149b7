//! Holds `Adapter` implementations by `ChannelType`, populated at startup and read-mostly
//! thereafter (§L1, §9 "Global registries").

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use gateway_protocol::ChannelType;

use crate::adapter::Adapter;
use crate::error::{AdapterError, GatewayError};

/// Process-wide adapter registry. Seeded at startup with known adapters; injected as an `Arc`
/// rather than exposed as a mutable singleton (§9).
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<ChannelType, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let channel_type = adapter.type_();
        self.adapters.write().unwrap().insert(channel_type, adapter);
    }

    pub fn get(&self, channel_type: &ChannelType) -> Result<Arc<dyn Adapter>, GatewayError> {
        self.adapters
            .read()
            .unwrap()
            .get(channel_type)
            .cloned()
            .ok_or_else(|| AdapterError::Unsupported(channel_type.as_str().to_string()).into())
    }

    /// Parses a platform tag string into a `ChannelType` and resolves the adapter for it in one
    /// step, used by the HTTP surface's `:platform` path segment.
    pub fn get_by_tag(&self, tag: &str) -> Result<Arc<dyn Adapter>, GatewayError> {
        self.get(&ChannelType::parse(tag))
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.adapters.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_channel_type_is_unsupported() {
        let registry = AdapterRegistry::new();
        let err = registry.get(&ChannelType::Guild).unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
