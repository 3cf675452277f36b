//! SQLite connection handle.
//!
//! A `Database` is only a resolved path: each public method opens its own
//! connection, so callers never manage connection lifetime and the handle
//! can be shared freely across blocking tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::{Record, Value};
use crate::query::{InsertStatement, SelectStatement, UpdateStatement};
use crate::store::sql::{render_insert, render_select, render_update};

/// Scheme prefix of the only supported storage provider.
pub const SQLITE_SCHEME: &str = "sqlite://";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn resolve(path: &Path) -> ShardlineResult<PathBuf> {
    let expanded = expand_tilde(&path.to_string_lossy());
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()?.join(expanded))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Resolve `path` and create its parent directories.
    pub fn open(path: impl AsRef<Path>) -> ShardlineResult<Self> {
        let resolved = resolve(path.as_ref())?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    /// Open from a `sqlite://<path>` connection string.
    pub fn from_connection_string(raw: &str) -> ShardlineResult<Self> {
        let path = raw.strip_prefix(SQLITE_SCHEME).ok_or_else(|| {
            ShardlineError::Config(format!("unknown storage provider in '{raw}'"))
        })?;
        if path.is_empty() || path == ":memory:" {
            return Err(ShardlineError::Config(format!(
                "'{raw}' does not name a database file"
            )));
        }
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn connection_string(&self) -> String {
        format!("{SQLITE_SCHEME}{}", self.db_path.display())
    }

    /// Open a new connection in WAL mode with a busy timeout.
    pub fn connect(&self) -> ShardlineResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn execute_batch(&self, sql: &str) -> ShardlineResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a rendered select and collect rows keyed by column name.
    pub fn query_rows(&self, stmt: &SelectStatement) -> ShardlineResult<Vec<Record>> {
        let (sql, params) = render_select(stmt)?;
        debug!(table = %stmt.table, %sql, "query_rows");
        let conn = self.connect()?;
        let mut prepared = conn.prepare(&sql)?;
        let columns: Vec<String> = prepared
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = prepared.query_map(params_from_iter(params.iter()), |row| {
            let mut record = Record::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), Value::from_sql_ref(row.get_ref(i)?));
            }
            Ok(record)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert one row and return its key.
    pub fn insert(&self, stmt: &InsertStatement) -> ShardlineResult<Value> {
        let (sql, params) = render_insert(stmt)?;
        debug!(table = %stmt.table, %sql, "insert");
        let conn = self.connect()?;
        let key = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
            Ok(Value::from_sql_ref(row.get_ref(0)?))
        })?;
        Ok(key)
    }

    /// Run an update and return the number of rows affected.
    pub fn execute_update(&self, stmt: &UpdateStatement) -> ShardlineResult<usize> {
        let (sql, params) = render_update(stmt)?;
        debug!(table = %stmt.table, %sql, "execute_update");
        let conn = self.connect()?;
        Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
    }

    /// Cheap liveness probe used by shard health reports.
    pub fn ping(&self) -> ShardlineResult<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
