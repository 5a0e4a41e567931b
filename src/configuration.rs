//!
//! Configurations tie a tenant's webhooks to a sink, and optionally to a key which callers must
//! present.
//!
//! Storage sits behind the [ConfigStore] trait, relish only ships the in-memory [MemoryStore].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::log::*;
use uuid::Uuid;

use std::collections::HashMap;

use crate::sink::descriptor::SinkDescriptor;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Configuration {
    /// An empty id means the configuration has not been stored yet
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub sink: SinkDescriptor,
    #[serde(default)]
    pub use_key: bool,
    /// Never handed back out over the API
    #[serde(default, skip_serializing)]
    pub key_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Configuration {
    /// Create a new configuration without an identity
    pub fn new(name: &str, sink: SinkDescriptor, use_key: bool) -> Self {
        let now = Utc::now();
        Configuration {
            id: String::new(),
            name: name.to_string(),
            sink,
            use_key,
            key_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_identified(&self) -> bool {
        !self.id.is_empty()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("configuration with id {0} not found")]
    NotFound(String),
    #[error("cannot insert an identified configuration")]
    AlreadyIdentified,
    #[error("configuration must be identified")]
    Unidentified,
}

#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// Store an unidentified configuration, returning it with its new identity
    async fn insert(&self, config: Configuration) -> Result<Configuration, StoreError>;
    async fn list(&self) -> Result<Vec<Configuration>, StoreError>;
    async fn get(&self, id: &str) -> Result<Configuration, StoreError>;
    /// Replace an existing identified configuration
    async fn update(&self, config: Configuration) -> Result<Configuration, StoreError>;
    async fn delete(&self, id: &str) -> Result<Configuration, StoreError>;
}

/// Configurations which only live as long as the process does
#[derive(Default)]
pub struct MemoryStore {
    configs: RwLock<HashMap<String, Configuration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryStore {
    async fn insert(&self, mut config: Configuration) -> Result<Configuration, StoreError> {
        if config.is_identified() {
            return Err(StoreError::AlreadyIdentified);
        }
        config.id = Uuid::new_v4().to_string();
        debug!("Inserting configuration {}", config.id);
        self.configs.write().insert(config.id.clone(), config.clone());
        Ok(config)
    }

    async fn list(&self) -> Result<Vec<Configuration>, StoreError> {
        let mut configs: Vec<Configuration> = self.configs.read().values().cloned().collect();
        configs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(configs)
    }

    async fn get(&self, id: &str) -> Result<Configuration, StoreError> {
        self.configs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, mut config: Configuration) -> Result<Configuration, StoreError> {
        if !config.is_identified() {
            return Err(StoreError::Unidentified);
        }
        let mut configs = self.configs.write();
        match configs.get(&config.id) {
            Some(existing) => {
                config.created_at = existing.created_at;
                config.updated_at = Utc::now();
                configs.insert(config.id.clone(), config.clone());
                Ok(config)
            }
            None => Err(StoreError::NotFound(config.id)),
        }
    }

    async fn delete(&self, id: &str) -> Result<Configuration, StoreError> {
        self.configs
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::descriptor::FileConfig;

    fn unidentified() -> Configuration {
        Configuration::new(
            "test",
            SinkDescriptor::File(FileConfig {
                file_path: "store.jsonl".into(),
            }),
            false,
        )
    }

    #[test]
    fn test_insert_assigns_identity() {
        let store = MemoryStore::new();
        let config = smol::block_on(store.insert(unidentified())).expect("Failed to insert");
        assert!(config.is_identified());
        assert_eq!(
            config,
            smol::block_on(store.get(&config.id)).expect("Failed to get")
        );
    }

    #[test]
    fn test_insert_refuses_identified() {
        let store = MemoryStore::new();
        let mut config = unidentified();
        config.id = "already".into();
        assert_eq!(
            Err(StoreError::AlreadyIdentified),
            smol::block_on(store.insert(config))
        );
    }

    #[test]
    fn test_update_keeps_created_at() {
        let store = MemoryStore::new();
        let config = smol::block_on(store.insert(unidentified())).expect("Failed to insert");

        let mut replacement = unidentified();
        replacement.id = config.id.clone();
        replacement.name = "renamed".into();
        let updated = smol::block_on(store.update(replacement)).expect("Failed to update");
        assert_eq!(config.created_at, updated.created_at);
        assert_eq!("renamed", updated.name);
    }

    #[test]
    fn test_update_unknown_or_unidentified() {
        let store = MemoryStore::new();
        assert_eq!(
            Err(StoreError::Unidentified),
            smol::block_on(store.update(unidentified()))
        );
        let mut ghost = unidentified();
        ghost.id = "ghost".into();
        assert_eq!(
            Err(StoreError::NotFound("ghost".into())),
            smol::block_on(store.update(ghost))
        );
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        let config = smol::block_on(store.insert(unidentified())).expect("Failed to insert");
        smol::block_on(store.delete(&config.id)).expect("Failed to delete");
        assert!(smol::block_on(store.get(&config.id)).is_err());
        assert!(smol::block_on(store.list()).expect("Failed to list").is_empty());
    }

    #[test]
    fn test_key_hash_is_not_serialized() {
        let mut config = unidentified();
        config.key_hash = Some("secret".into());
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        assert!(!json.contains("secret"));
    }
}
