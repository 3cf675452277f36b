//! Projection strategies and the full-text search projection.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::Record;
use crate::query::guards::{clamp_limit, MAX_SEARCH_LIMIT};
use crate::schema::{DataType, Entity, View};
use crate::store::database::Database;
use crate::store::sql::escape_like;

/// Applies current record state to a derived read model.
///
/// Both operations are keyed by `(entity_name, record_id)` and must be
/// idempotent: the worker may deliver the same message more than once.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Also the consumer group name on the bus.
    fn name(&self) -> &str;

    async fn upsert(&self, entity: &Entity, record_id: &str, record: &Record)
        -> ShardlineResult<()>;

    async fn remove(&self, entity_name: &str, record_id: &str) -> ShardlineResult<()>;
}

// ---------------------------------------------------------------------------
// SearchProjection
// ---------------------------------------------------------------------------

const SEARCH_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS search_documents (
    entity_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity_name, record_id)
);
CREATE INDEX IF NOT EXISTS idx_search_documents_title ON search_documents(title);";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub entity_name: String,
    pub record_id: String,
    pub title: String,
    pub content: String,
    pub updated_at: String,
}

impl SearchDocument {
    /// Title from the label attribute, content from the other detail-view
    /// text attributes.
    pub fn from_record(entity: &Entity, record_id: &str, record: &Record) -> Self {
        let label = entity.label_attribute().map(|a| a.field.as_str());
        let title = label
            .and_then(|field| record.get(field))
            .and_then(|v| v.to_text())
            .unwrap_or_else(|| record_id.to_string());
        let content = entity
            .attributes_for(View::Detail, Some(&DataType::Text))
            .into_iter()
            .filter(|a| Some(a.field.as_str()) != label)
            .filter_map(|a| record.get(&a.field).and_then(|v| v.to_text()))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            entity_name: entity.name().to_string(),
            record_id: record_id.to_string(),
            title,
            content,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_name: row.get(0)?,
            record_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

fn projection_error(e: impl std::fmt::Display) -> ShardlineError {
    ShardlineError::Projection(e.to_string())
}

/// Search index kept in its own SQLite database.
#[derive(Clone, Debug)]
pub struct SearchProjection {
    name: String,
    db: Database,
}

impl SearchProjection {
    pub const DEFAULT_NAME: &'static str = "search";

    pub fn open(db: Database) -> ShardlineResult<Self> {
        db.execute_batch(SEARCH_SCHEMA)?;
        Ok(Self {
            name: Self::DEFAULT_NAME.to_string(),
            db,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn blocking<T, F>(&self, f: F) -> ShardlineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> ShardlineResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.connect()?)).await?
    }

    pub async fn document(
        &self,
        entity_name: &str,
        record_id: &str,
    ) -> ShardlineResult<Option<SearchDocument>> {
        let key = (entity_name.to_string(), record_id.to_string());
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_name, record_id, title, content, updated_at \
                 FROM search_documents WHERE entity_name = ?1 AND record_id = ?2",
            )?;
            let mut rows = stmt.query_map(params![key.0, key.1], SearchDocument::from_row)?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    /// Substring match over title and content, most recent first.
    pub async fn search(&self, term: &str, limit: u32) -> ShardlineResult<Vec<SearchDocument>> {
        let pattern = format!("%{}%", escape_like(term));
        let limit = clamp_limit(limit, MAX_SEARCH_LIMIT);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_name, record_id, title, content, updated_at \
                 FROM search_documents \
                 WHERE title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\' \
                 ORDER BY updated_at DESC, entity_name, record_id LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit], SearchDocument::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn count(&self) -> ShardlineResult<u64> {
        self.blocking(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM search_documents", [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl Projection for SearchProjection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(
        &self,
        entity: &Entity,
        record_id: &str,
        record: &Record,
    ) -> ShardlineResult<()> {
        let doc = SearchDocument::from_record(entity, record_id, record);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO search_documents (entity_name, record_id, title, content, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(entity_name, record_id) DO UPDATE SET \
                 title = excluded.title, content = excluded.content, \
                 updated_at = excluded.updated_at",
                params![doc.entity_name, doc.record_id, doc.title, doc.content, doc.updated_at],
            )
            .map_err(projection_error)?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, entity_name: &str, record_id: &str) -> ShardlineResult<()> {
        let key = (entity_name.to_string(), record_id.to_string());
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM search_documents WHERE entity_name = ?1 AND record_id = ?2",
                params![key.0, key.1],
            )
            .map_err(projection_error)?;
            Ok(())
        })
        .await
    }
}
