use serde::{Deserialize, Serialize};

/// Default exclusive upper bound of the partition key space.
pub const DEFAULT_KEY_SPACE_END: u64 = 1 << 32;

fn default_key_space_end() -> u64 {
    DEFAULT_KEY_SPACE_END
}

/// One shard group: a leader, its followers, and the key range it owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardGroupConfig {
    /// Defaults to `shard-<index>`.
    #[serde(default)]
    pub name: Option<String>,
    pub leader: String,
    #[serde(default)]
    pub followers: Vec<String>,
    pub range_start: u64,
    pub range_end: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardsConfig {
    #[serde(default = "default_key_space_end")]
    pub key_space_end: u64,
    #[serde(default)]
    pub groups: Vec<ShardGroupConfig>,
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            key_space_end: DEFAULT_KEY_SPACE_END,
            groups: Vec::new(),
        }
    }
}
