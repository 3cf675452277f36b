//! Fetch strategies: how a worker re-reads the record a message names.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ShardlineResult;
use crate::models::{Record, RecordMessage};
use crate::query::QueryBuilder;
use crate::schema::{Entity, SchemaRegistry, View};
use crate::store::sharding::{ReadPreference, ShardRouter};

#[async_trait]
pub trait RecordReader: Send + Sync {
    /// Current state of the record, or `None` if it is gone or soft-deleted.
    async fn fetch(&self, message: &RecordMessage)
        -> ShardlineResult<Option<(Arc<Entity>, Record)>>;
}

/// Reads through the shard router using the message's partition key.
#[derive(Clone, Debug)]
pub struct ShardedRecordReader {
    registry: Arc<SchemaRegistry>,
    router: Arc<ShardRouter>,
    builder: QueryBuilder,
    preference: ReadPreference,
}

impl ShardedRecordReader {
    /// Reads from the leader so a worker sees the write that triggered it.
    pub fn new(registry: Arc<SchemaRegistry>, router: Arc<ShardRouter>, builder: QueryBuilder) -> Self {
        Self {
            registry,
            router,
            builder,
            preference: ReadPreference::Leader,
        }
    }

    pub fn with_preference(mut self, preference: ReadPreference) -> Self {
        self.preference = preference;
        self
    }
}

#[async_trait]
impl RecordReader for ShardedRecordReader {
    async fn fetch(
        &self,
        message: &RecordMessage,
    ) -> ShardlineResult<Option<(Arc<Entity>, Record)>> {
        let entity = self.registry.entity(&message.entity_name)?;
        let selection = self.builder.resolve_selection(&entity, &[], View::Detail)?;
        let stmt = self.builder.single(&entity, &selection, &message.record_id)?;
        let group = self.router.resolve(message.partition_key)?;
        let db = group.connection_for(self.preference).clone();
        debug!(
            entity = entity.name(),
            record_id = %message.record_id,
            shard = group.name(),
            "re-reading record"
        );

        let rows = tokio::task::spawn_blocking(move || db.query_rows(&stmt)).await??;
        Ok(rows.into_iter().next().map(|mut record| {
            entity.normalize_record(&mut record);
            (entity, record)
        }))
    }
}
