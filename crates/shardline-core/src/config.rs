//! Startup configuration.
//!
//! `CoreConfig` is read once, from TOML or JSON, and handed by reference to
//! the components built from it. Nothing reads configuration from ambient
//! state after startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::query::guards::MAX_PAGE_SIZE;
use crate::schema::SchemaRegistry;
use crate::store::sharding::ShardsConfig;
use crate::sync::DeliveryPolicy;

pub const DEFAULT_RECORD_TOPIC: &str = "record.changed";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Topic every change event is published on.
    pub record_topic: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            record_topic: DEFAULT_RECORD_TOPIC.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Processing attempts per message. 1 means best effort.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub dead_letter_topic: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff_ms: 50,
            dead_letter_topic: None,
        }
    }
}

impl SyncConfig {
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.max_attempts.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            dead_letter_topic: self.dead_letter_topic.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Upper bound for any requested page. Per-entity defaults live on the
    /// entity definitions.
    pub max_page_size: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub shards: ShardsConfig,
    pub bus: BusConfig,
    pub sync: SyncConfig,
    pub query: QueryConfig,
    /// JSON file of entity definitions.
    pub schema_path: Option<PathBuf>,
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> ShardlineResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> ShardlineResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> ShardlineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&raw),
            Some("json") => Self::from_json_str(&raw),
            _ => Err(ShardlineError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    fn check(&self) -> ShardlineResult<()> {
        if self.query.max_page_size == 0 {
            return Err(ShardlineError::Config("query.max_page_size must be positive".into()));
        }
        if self.bus.record_topic.is_empty() {
            return Err(ShardlineError::Config("bus.record_topic must not be empty".into()));
        }
        Ok(())
    }

    /// Load the entity registry named by `schema_path`, or an empty one.
    pub fn schema_registry(&self) -> ShardlineResult<SchemaRegistry> {
        match &self.schema_path {
            Some(path) => SchemaRegistry::load_file(path),
            None => Ok(SchemaRegistry::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
schema_path = "schema.json"

[shards]
key_space_end = 100

[[shards.groups]]
leader = "sqlite:///var/lib/shardline/a.db"
followers = ["sqlite:///var/lib/shardline/a-r1.db"]
range_start = 0
range_end = 50

[[shards.groups]]
leader = "sqlite:///var/lib/shardline/b.db"
range_start = 50
range_end = 100

[sync]
max_attempts = 3
dead_letter_topic = "record.dead"
"#;

    #[test]
    fn toml_fills_defaults() {
        let config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.shards.key_space_end, 100);
        assert_eq!(config.shards.groups.len(), 2);
        assert!(config.shards.groups[1].followers.is_empty());
        assert_eq!(config.bus.record_topic, DEFAULT_RECORD_TOPIC);
        assert_eq!(config.query, QueryConfig::default());

        let policy = config.sync.delivery_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_backoff, Duration::from_millis(50));
        assert_eq!(policy.dead_letter_topic.as_deref(), Some("record.dead"));
    }

    #[test]
    fn json_and_toml_agree() {
        let toml_config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&toml_config).unwrap();
        assert_eq!(CoreConfig::from_json_str(&json).unwrap(), toml_config);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("core.toml");
        std::fs::write(&toml_path, SAMPLE).unwrap();
        assert_eq!(CoreConfig::load(&toml_path).unwrap().shards.groups.len(), 2);

        let yaml_path = dir.path().join("core.yaml");
        std::fs::write(&yaml_path, "shards: {}").unwrap();
        assert!(CoreConfig::load(&yaml_path).unwrap_err().is_fatal());
    }

    #[test]
    fn zero_page_size_rejected() {
        let err = CoreConfig::from_toml_str("[query]\nmax_page_size = 0\n").unwrap_err();
        assert!(err.is_fatal());
    }
}
