pub mod config;
pub mod group;
pub mod router;

pub use config::{ShardGroupConfig, ShardsConfig, DEFAULT_KEY_SPACE_END};
pub use group::{KeyRange, ReadPreference, ShardGroup};
pub use router::{HealthStatus, ShardHealth, ShardRole, ShardRouter};
