//! In-memory catalog of adapters keyed by platform id.
//!
//! The registry is read-mostly: adapters are registered at startup and then
//! looked up concurrently by every enforcement task. Lookups take the read
//! lock, registration the write lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::bark::BarkAdapter;
use super::nextdns::NextDnsAdapter;
use super::qustodio::QustodioAdapter;
use super::{Adapter, AdapterError, AdapterSettings};
use crate::config::Config;
use crate::models::{support_for, RuleCategory, SupportLevel};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Platform already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Adapter setup failed: {0}")]
    Setup(#[from] AdapterError),
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in vendor adapters using `config`.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry = Self::new();

        let settings = |platform: &str, base_url: &str| {
            let mut s = AdapterSettings::new(base_url, config.vendor_timeout);
            if let Some(caps) = config.capability_overrides.get(platform) {
                s = s.with_capabilities(caps.clone());
            }
            s
        };

        registry.register(Arc::new(NextDnsAdapter::new(settings(
            NextDnsAdapter::PLATFORM_ID,
            &config.nextdns_base_url,
        ))?))?;
        registry.register(Arc::new(BarkAdapter::new(settings(
            BarkAdapter::PLATFORM_ID,
            &config.bark_base_url,
        ))?))?;
        registry.register(Arc::new(QustodioAdapter::new(settings(
            QustodioAdapter::PLATFORM_ID,
            &config.qustodio_base_url,
        ))?))?;

        Ok(registry)
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) -> Result<(), RegistryError> {
        let id = adapter.info().id.clone();
        let mut adapters = self.adapters.write().expect("registry lock poisoned");
        if adapters.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        tracing::info!(platform = %id, "Registered adapter");
        adapters.insert(id, adapter);
        Ok(())
    }

    pub fn get(&self, platform_id: &str) -> Option<Arc<dyn Adapter>> {
        let adapters = self.adapters.read().expect("registry lock poisoned");
        adapters.get(platform_id).cloned()
    }

    pub fn require(&self, platform_id: &str) -> Result<Arc<dyn Adapter>, RegistryError> {
        self.get(platform_id)
            .ok_or_else(|| RegistryError::UnknownPlatform(platform_id.to_string()))
    }

    /// All adapters, sorted by platform id.
    pub fn list(&self) -> Vec<Arc<dyn Adapter>> {
        let adapters = self.adapters.read().expect("registry lock poisoned");
        let mut list: Vec<_> = adapters.values().cloned().collect();
        list.sort_by(|a, b| a.info().id.cmp(&b.info().id));
        list
    }

    /// Adapters declaring at least `minimum` support for `category`.
    pub fn supporting(
        &self,
        category: &RuleCategory,
        minimum: SupportLevel,
    ) -> Vec<Arc<dyn Adapter>> {
        self.list()
            .into_iter()
            .filter(|a| {
                let level = support_for(a.capabilities(), category);
                level != SupportLevel::None && level >= minimum
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
