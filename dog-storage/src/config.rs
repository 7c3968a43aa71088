use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::{
    cloudinary::{CloudinaryConfig, CloudinaryService},
    events::{EventSink, TracingEventSink},
    memory::{MemoryConfig, MemoryService},
    BlobError, BlobResult, StorageService,
};

/// Configuration for one storage service.
///
/// The backend is chosen here, once, when configuration is loaded:
///
/// ```json
/// { "service": "Cloudinary", "cloud_name": "demo", "api_key": "...", "api_secret": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum ServiceConfig {
    Cloudinary(CloudinaryConfig),
    Memory(MemoryConfig),
}

impl ServiceConfig {
    pub fn validate(&self) -> BlobResult<()> {
        match self {
            Self::Cloudinary(config) => config.validate(),
            Self::Memory(config) => config.validate(),
        }
    }

    /// Build the service, sending its events to `events`
    pub fn build(self, events: Arc<dyn EventSink>) -> BlobResult<Arc<dyn StorageService>> {
        self.validate()?;
        let service: Arc<dyn StorageService> = match self {
            Self::Cloudinary(config) => Arc::new(CloudinaryService::new(config)?.with_events(events)),
            Self::Memory(config) => Arc::new(MemoryService::with_config(config).with_events(events)),
        };
        Ok(service)
    }
}

/// Named services, e.g. `local` and `production`
#[derive(Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn StorageService>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every service in a name → config map
    pub fn configure(
        configs: BTreeMap<String, ServiceConfig>,
        events: Arc<dyn EventSink>,
    ) -> BlobResult<Self> {
        let mut registry = Self::new();
        for (name, config) in configs {
            let service = config
                .build(events.clone())
                .map_err(|e| BlobError::config(format!("service {}: {}", name, e)))?;
            info!(name = %name, backend = service.name(), "configured storage service");
            registry.register(name, service);
        }
        Ok(registry)
    }

    /// Parse a JSON object of named service configs and build them
    pub fn from_json(json: &str) -> BlobResult<Self> {
        let configs: BTreeMap<String, ServiceConfig> = serde_json::from_str(json)?;
        Self::configure(configs, Arc::new(TracingEventSink))
    }

    /// Register a service under `name`, replacing any previous one
    pub fn register<S: Into<String>>(&mut self, name: S, service: Arc<dyn StorageService>) {
        self.services.insert(name.into(), service);
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> BlobResult<Arc<dyn StorageService>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| BlobError::config(format!("no storage service named {}", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}
