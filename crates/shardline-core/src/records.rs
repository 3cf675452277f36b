//! Entity-aware write and read path.
//!
//! Writes go to the leader of the shard that owns the partition key and are
//! followed by a change event on the record topic. Reads validate every
//! filter and sort before any SQL is built, then run the entity's hooks
//! around execution.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::config::CoreConfig;
use crate::errors::{ShardlineError, ShardlineResult};
use crate::hooks::HookRegistry;
use crate::models::{Operation, Record, RecordMessage, Value};
use crate::query::{
    filters_from_arguments, validate_filters, validate_sorts, Page, Query, QueryBuilder,
    SelectStatement, Sort,
};
use crate::schema::{Entity, SchemaRegistry, View};
use crate::store::database::Database;
use crate::store::sharding::{ReadPreference, ShardRouter};

/// Arguments of a list read.
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    /// Field path to argument bag; see `filters_from_arguments`.
    pub arguments: IndexMap<String, serde_json::Value>,
    pub omit_on_empty: bool,
    pub sorts: Vec<Sort>,
    pub selection: Vec<String>,
    pub page: Page,
    pub preference: ReadPreference,
}

#[derive(Clone, Debug)]
pub struct RecordService {
    registry: Arc<SchemaRegistry>,
    hooks: Arc<HookRegistry>,
    router: Arc<ShardRouter>,
    bus: MessageBus,
    builder: QueryBuilder,
    record_topic: String,
}

async fn blocking<T, F>(db: Database, f: F) -> ShardlineResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> ShardlineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&db)).await?
}

/// Canonical text form of a record key, e.g. `"007"` becomes `"7"`.
fn typed_key(entity: &Entity, raw: &str) -> ShardlineResult<Value> {
    entity
        .key_attribute()?
        .cast(raw)
        .map_err(|e| ShardlineError::validation(entity.name(), e))
}

fn canonical_id(entity: &Entity, raw: &str) -> ShardlineResult<String> {
    typed_key(entity, raw)?
        .to_text()
        .ok_or_else(|| ShardlineError::validation(entity.name(), "record key is null"))
}

impl RecordService {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        hooks: Arc<HookRegistry>,
        router: Arc<ShardRouter>,
        bus: MessageBus,
        builder: QueryBuilder,
        record_topic: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            hooks,
            router,
            bus,
            builder,
            record_topic: record_topic.into(),
        }
    }

    pub fn from_config(
        config: &CoreConfig,
        registry: Arc<SchemaRegistry>,
        hooks: Arc<HookRegistry>,
        router: Arc<ShardRouter>,
        bus: MessageBus,
    ) -> Self {
        Self::new(
            registry,
            hooks,
            router,
            bus,
            QueryBuilder::new(&config.query),
            config.bus.record_topic.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    fn leader(&self, partition_key: u64) -> ShardlineResult<Database> {
        Ok(self
            .router
            .resolve(partition_key)?
            .leader_connection()
            .clone())
    }

    fn reader(&self, partition_key: u64, preference: ReadPreference) -> ShardlineResult<Database> {
        Ok(self
            .router
            .resolve(partition_key)?
            .connection_for(preference)
            .clone())
    }

    /// Publish a change event. Delivery is best effort, so a failure is
    /// logged and the write still succeeds.
    fn notify(&self, operation: Operation, entity: &Entity, record_id: &str, partition_key: u64) {
        let message = RecordMessage::new(operation, entity.name(), record_id, partition_key);
        match self.bus.publish_record(&self.record_topic, &message) {
            Ok(groups) => debug!(key = %message.key(), %operation, groups, "published change"),
            Err(e) => warn!(key = %message.key(), %operation, error = %e, "change event lost"),
        }
    }

    async fn fetch(
        &self,
        entity: &Entity,
        db: Database,
        mut stmt: SelectStatement,
        list_hooks: bool,
    ) -> ShardlineResult<Vec<Record>> {
        if list_hooks {
            self.hooks.run_before_list(entity, &mut stmt)?;
        }
        let mut rows = blocking(db, move |db| db.query_rows(&stmt)).await?;
        for row in rows.iter_mut() {
            entity.normalize_record(row);
        }
        self.hooks.run_after_read(entity, &mut rows)?;
        Ok(rows)
    }

    /// Insert a record and return its generated key.
    pub async fn create(
        &self,
        partition_key: u64,
        entity_name: &str,
        mut record: Record,
    ) -> ShardlineResult<Value> {
        let entity = self.registry.entity(entity_name)?;
        self.hooks
            .run_before_write(&entity, Operation::Create, &mut record)?;
        let stmt = self.builder.insert(&entity, &record)?;
        let db = self.leader(partition_key)?;

        let key = blocking(db, move |db| db.insert(&stmt)).await?;
        let record_id = key.to_text().unwrap_or_default();
        self.notify(Operation::Create, &entity, &record_id, partition_key);
        Ok(key)
    }

    /// Update by key. `None` when the record carries no key.
    pub async fn update(
        &self,
        partition_key: u64,
        entity_name: &str,
        mut record: Record,
    ) -> ShardlineResult<Option<usize>> {
        let entity = self.registry.entity(entity_name)?;
        self.hooks
            .run_before_write(&entity, Operation::Update, &mut record)?;
        let Some(stmt) = self.builder.update(&entity, &record)? else {
            debug!(entity = entity_name, "update without key or fields, skipped");
            return Ok(None);
        };
        let record_id = match record
            .get(entity.primary_key_field())
            .and_then(Value::to_text)
        {
            Some(raw) => canonical_id(&entity, &raw)?,
            None => return Ok(None),
        };
        let db = self.leader(partition_key)?;

        let affected = blocking(db, move |db| db.execute_update(&stmt)).await?;
        if affected > 0 {
            self.notify(Operation::Update, &entity, &record_id, partition_key);
        }
        Ok(Some(affected))
    }

    /// Soft-delete by key. BeforeWrite hooks see a record holding only the key.
    pub async fn delete(
        &self,
        partition_key: u64,
        entity_name: &str,
        id: &str,
    ) -> ShardlineResult<usize> {
        let entity = self.registry.entity(entity_name)?;
        let record_id = canonical_id(&entity, id)?;
        let mut key_only = Record::new();
        key_only.insert(entity.primary_key_field().to_string(), typed_key(&entity, id)?);
        self.hooks
            .run_before_write(&entity, Operation::Delete, &mut key_only)?;
        let stmt = self.builder.soft_delete(&entity, id)?;
        let db = self.leader(partition_key)?;

        let affected = blocking(db, move |db| db.execute_update(&stmt)).await?;
        if affected > 0 {
            self.notify(Operation::Delete, &entity, &record_id, partition_key);
        }
        Ok(affected)
    }

    pub async fn get(
        &self,
        partition_key: u64,
        entity_name: &str,
        id: &str,
        selection: &[String],
        preference: ReadPreference,
    ) -> ShardlineResult<Option<Record>> {
        let entity = self.registry.entity(entity_name)?;
        let selection = self
            .builder
            .resolve_selection(&entity, selection, View::Detail)?;
        let stmt = self.builder.single(&entity, &selection, id)?;
        let db = self.reader(partition_key, preference)?;
        let rows = self.fetch(&entity, db, stmt, false).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn list(
        &self,
        partition_key: u64,
        entity_name: &str,
        request: &ListRequest,
    ) -> ShardlineResult<Vec<Record>> {
        let entity = self.registry.entity(entity_name)?;
        let raw = filters_from_arguments(&entity, &request.arguments, request.omit_on_empty)?;
        let filters = validate_filters(&entity, &raw, self.registry.as_ref())?;
        let sorts = validate_sorts(&entity, &request.sorts, self.registry.as_ref())?;
        let selection = self
            .builder
            .resolve_selection(&entity, &request.selection, View::List)?;

        let Some(stmt) = self
            .builder
            .list(&entity, &selection, &filters, &sorts, &request.page)?
        else {
            return Ok(Vec::new());
        };
        let db = self.reader(partition_key, request.preference)?;
        self.fetch(&entity, db, stmt, true).await
    }

    pub async fn many(
        &self,
        partition_key: u64,
        entity_name: &str,
        ids: &[String],
        selection: &[String],
        preference: ReadPreference,
    ) -> ShardlineResult<Vec<Record>> {
        let entity = self.registry.entity(entity_name)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let selection = self
            .builder
            .resolve_selection(&entity, selection, View::List)?;
        let stmt = self.builder.many(&entity, &selection, ids)?;
        let db = self.reader(partition_key, preference)?;
        self.fetch(&entity, db, stmt, false).await
    }

    /// Run a named query.
    pub async fn query(
        &self,
        partition_key: u64,
        query: &Query,
        page: &Page,
        preference: ReadPreference,
    ) -> ShardlineResult<Vec<Record>> {
        let entity = self.registry.entity(&query.entity_name)?;
        let Some(stmt) = self.builder.from_query(&self.registry, query, page)? else {
            return Ok(Vec::new());
        };
        let db = self.reader(partition_key, preference)?;
        self.fetch(&entity, db, stmt, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, DataType};

    #[test]
    fn canonical_ids_follow_the_key_caster() {
        let entity = Entity::new(
            "post",
            "posts",
            "id",
            None,
            None,
            vec![Attribute::new("id", DataType::Int)],
        )
        .unwrap();
        assert_eq!(canonical_id(&entity, "007").unwrap(), "7");
        assert!(canonical_id(&entity, "seven").unwrap_err().is_validation());
    }
}
