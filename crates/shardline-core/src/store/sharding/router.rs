//! Shard router: maps partition keys to the shard group that owns them.
//!
//! Ranges are checked once at construction. After that, routing is a
//! linear scan in construction order and never consults anything mutable.

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::store::database::Database;
use crate::store::sharding::config::ShardsConfig;
use crate::store::sharding::group::{KeyRange, ShardGroup};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardRole {
    Leader,
    Follower,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// One probed connection of one shard group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShardHealth {
    pub group: String,
    pub role: ShardRole,
    pub connection: String,
    pub range_start: u64,
    pub range_end: u64,
    pub status: HealthStatus,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ShardRouter {
    groups: Vec<ShardGroup>,
    key_space_end: u64,
}

/// Ranges sorted by start must tile `[0, key_space_end)` exactly.
fn check_ranges(groups: &[ShardGroup], key_space_end: u64) -> ShardlineResult<()> {
    if groups.is_empty() {
        return Err(ShardlineError::Config("no shard groups configured".into()));
    }
    let mut ranges: Vec<(KeyRange, &str)> = groups.iter().map(|g| (g.range(), g.name())).collect();
    ranges.sort_by_key(|(r, _)| r.start);

    let mut expected = 0u64;
    for (range, name) in ranges {
        if range.is_empty() {
            return Err(ShardlineError::Config(format!(
                "shard '{name}' has empty range {range}"
            )));
        }
        if range.start > expected {
            return Err(ShardlineError::Config(format!(
                "gap in shard ranges: keys [{expected}, {}) have no shard",
                range.start
            )));
        }
        if range.start < expected {
            return Err(ShardlineError::Config(format!(
                "shard '{name}' range {range} overlaps a previous range"
            )));
        }
        expected = range.end;
    }
    if expected != key_space_end {
        return Err(ShardlineError::Config(format!(
            "shard ranges end at {expected}, key space ends at {key_space_end}"
        )));
    }
    Ok(())
}

impl ShardRouter {
    pub fn new(groups: Vec<ShardGroup>, key_space_end: u64) -> ShardlineResult<Self> {
        check_ranges(&groups, key_space_end)?;
        Ok(Self {
            groups,
            key_space_end,
        })
    }

    /// Open every configured connection and validate the ranges.
    pub fn from_config(config: &ShardsConfig) -> ShardlineResult<Self> {
        let mut groups = Vec::with_capacity(config.groups.len());
        for (index, group) in config.groups.iter().enumerate() {
            let name = group
                .name
                .clone()
                .unwrap_or_else(|| format!("shard-{index}"));
            let leader = Database::from_connection_string(&group.leader)?;
            let followers = group
                .followers
                .iter()
                .map(|raw| Database::from_connection_string(raw))
                .collect::<ShardlineResult<Vec<_>>>()?;
            groups.push(ShardGroup::new(
                name,
                leader,
                followers,
                KeyRange::new(group.range_start, group.range_end),
            ));
        }
        Self::new(groups, config.key_space_end)
    }

    pub fn groups(&self) -> &[ShardGroup] {
        &self.groups
    }

    pub fn key_space_end(&self) -> u64 {
        self.key_space_end
    }

    /// The group whose range contains `key`.
    pub fn resolve(&self, key: u64) -> ShardlineResult<&ShardGroup> {
        let group = self
            .groups
            .iter()
            .find(|g| g.range().contains(key))
            .ok_or_else(|| ShardlineError::Config(format!("no shard for partition key {key}")))?;
        debug!(key, shard = group.name(), "resolved shard");
        Ok(group)
    }

    /// Hash a string partition (e.g. a tenant id) into the key space.
    pub fn partition_key(&self, partition: &str) -> u64 {
        u64::from(crc32fast::hash(partition.as_bytes())) % self.key_space_end
    }

    pub fn resolve_str(&self, partition: &str) -> ShardlineResult<&ShardGroup> {
        self.resolve(self.partition_key(partition))
    }

    /// Probe the leader and every follower of every group.
    pub fn health(&self) -> Vec<ShardHealth> {
        let mut reports = Vec::new();
        for group in &self.groups {
            let targets = std::iter::once((ShardRole::Leader, group.leader_connection()))
                .chain(group.followers().iter().map(|f| (ShardRole::Follower, f)));
            for (role, db) in targets {
                let (status, error) = match db.ping() {
                    Ok(()) => (HealthStatus::Ok, None),
                    Err(e) => {
                        warn!(shard = group.name(), ?role, error = %e, "shard probe failed");
                        (HealthStatus::Error, Some(e.to_string()))
                    }
                };
                reports.push(ShardHealth {
                    group: group.name().to_string(),
                    role,
                    connection: db.connection_string(),
                    range_start: group.range().start,
                    range_end: group.range().end,
                    status,
                    error,
                });
            }
        }
        reports
    }
}
