//! Table and column existence checks for entity tables.
//!
//! This is the only schema management the core performs: create a missing
//! table, add missing columns. Renames, type changes, and drops are left to
//! the operator.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::errors::ShardlineResult;
use crate::models::DELETED_COLUMN;
use crate::schema::{Attribute, DataType, Entity, SchemaRegistry};
use crate::store::database::Database;
use crate::store::sql::quote;

pub trait Migrator {
    fn table_exists(&self, table: &str) -> ShardlineResult<bool>;
    fn column_exists(&self, table: &str, column: &str) -> ShardlineResult<bool>;
    /// Create the entity's table or add its missing columns.
    fn ensure_table(&self, entity: &Entity) -> ShardlineResult<()>;
}

pub struct SqliteMigrator {
    db: Database,
}

fn table_exists(conn: &Connection, table: &str) -> ShardlineResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> ShardlineResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_definition(entity: &Entity, attr: &Attribute) -> ShardlineResult<String> {
    let mut def = format!("{} {}", quote(&attr.field)?, attr.data_type.sql_type());
    if attr.field == entity.primary_key_field() {
        def.push_str(" PRIMARY KEY");
        if attr.data_type == DataType::Text {
            def.push_str(" NOT NULL");
        }
        return Ok(def);
    }
    if !attr.optional {
        def.push_str(" NOT NULL");
    }
    if attr.unique {
        def.push_str(" UNIQUE");
    }
    Ok(def)
}

fn deleted_definition() -> ShardlineResult<String> {
    Ok(format!("{} INTEGER NOT NULL DEFAULT 0", quote(DELETED_COLUMN)?))
}

impl SqliteMigrator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ensure every entity of `registry` has its table.
    pub fn ensure_all(&self, registry: &SchemaRegistry) -> ShardlineResult<()> {
        for entity in registry.entities() {
            self.ensure_table(entity)?;
        }
        Ok(())
    }

    fn create_table(conn: &Connection, entity: &Entity) -> ShardlineResult<()> {
        let mut columns = entity
            .attributes()
            .iter()
            .map(|attr| column_definition(entity, attr))
            .collect::<ShardlineResult<Vec<_>>>()?;
        columns.push(deleted_definition()?);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote(entity.table_name())?,
            columns.join(", ")
        ))?;
        info!(entity = entity.name(), table = entity.table_name(), "created table");
        Ok(())
    }

    fn add_missing_columns(conn: &Connection, entity: &Entity) -> ShardlineResult<()> {
        let table = entity.table_name();
        let quoted = quote(table)?;
        for attr in entity.attributes() {
            if column_exists(conn, table, &attr.field)? {
                continue;
            }
            // ALTER TABLE cannot add NOT NULL without a default, nor UNIQUE.
            conn.execute_batch(&format!(
                "ALTER TABLE {quoted} ADD COLUMN {} {};",
                quote(&attr.field)?,
                attr.data_type.sql_type()
            ))?;
            if attr.unique {
                conn.execute_batch(&format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {quoted}({});",
                    quote(&format!("ux_{table}_{}", attr.field))?,
                    quote(&attr.field)?
                ))?;
            }
            info!(entity = entity.name(), column = %attr.field, "added column");
        }
        if !column_exists(conn, table, DELETED_COLUMN)? {
            conn.execute_batch(&format!(
                "ALTER TABLE {quoted} ADD COLUMN {};",
                deleted_definition()?
            ))?;
            info!(entity = entity.name(), column = DELETED_COLUMN, "added column");
        }
        Ok(())
    }
}

impl Migrator for SqliteMigrator {
    fn table_exists(&self, table: &str) -> ShardlineResult<bool> {
        table_exists(&self.db.connect()?, table)
    }

    fn column_exists(&self, table: &str, column: &str) -> ShardlineResult<bool> {
        column_exists(&self.db.connect()?, table, column)
    }

    fn ensure_table(&self, entity: &Entity) -> ShardlineResult<()> {
        let conn = self.db.connect()?;
        conn.execute_batch("SAVEPOINT shardline_ensure_table;")?;
        let step = (|| -> ShardlineResult<()> {
            if table_exists(&conn, entity.table_name())? {
                Self::add_missing_columns(&conn, entity)
            } else {
                Self::create_table(&conn, entity)
            }
        })();
        match step {
            Ok(()) => {
                conn.execute_batch("RELEASE SAVEPOINT shardline_ensure_table;")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT shardline_ensure_table;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT shardline_ensure_table;");
                Err(e)
            }
        }
    }
}
