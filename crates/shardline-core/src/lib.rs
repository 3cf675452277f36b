//! Shardline core library: a schema-driven data-access layer for a sharded,
//! multi-tenant content store.
//!
//! The crate provides the entity/attribute schema model, filter and sort
//! validation, backend-neutral query construction with a SQLite renderer,
//! the shard group and router abstraction, an in-process message bus, and
//! the generic sync worker that keeps derived read models (such as the
//! search projection) in step with the primary store.
//!
//! Components are built once from a [`config::CoreConfig`] and passed
//! around explicitly; nothing here lives in global state.

pub mod bus;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod query;
pub mod records;
pub mod schema;
pub mod shutdown;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use bus::{Envelope, MessageBus, Subscription};
pub use config::CoreConfig;
pub use errors::{ShardlineError, ShardlineResult};
pub use hooks::{HookKind, HookRegistry, HookTarget};
pub use models::{Operation, Record, RecordMessage, Value};
pub use records::{ListRequest, RecordService};
pub use schema::{Attribute, DataType, Entity, SchemaRegistry};
pub use store::sharding::{ReadPreference, ShardRouter};
pub use sync::{SearchProjection, ShardedRecordReader, SyncWorker};
