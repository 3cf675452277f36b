//! Backend-neutral query construction.
//!
//! The builder turns a validated entity, a selection, filters, sorts, and a
//! page request into plain statement values. Statements never hold a
//! connection; `store::sql` renders them for SQLite and `store::database`
//! executes them.
//!
//! Every read shape carries the implicit `deleted = false` predicate, so a
//! soft-deleted row is invisible to all of them while still occupying its
//! unique-key slot in the table.

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::{Record, Value, DELETED_COLUMN};
use crate::query::filter::{
    validate_filters, validate_sorts, Constraint, ConstraintValue, Direction, Filter, Logical,
    Operator, Sort, ValidFilter, ValidSort,
};
use crate::query::guards::{clamp_limit, MAX_MANY_KEYS};
use crate::schema::{Attribute, DataType, Entity, SchemaRegistry, View};

// ---------------------------------------------------------------------------
// Statement model
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        operator: Operator,
        value: ConstraintValue,
    },
    /// `column IN (SELECT key FROM table WHERE inner AND deleted = false)`.
    Related {
        column: String,
        table: String,
        key: String,
        inner: Box<Predicate>,
    },
    Group {
        logical: Logical,
        predicates: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn compare(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Predicate::Compare {
            column: column.into(),
            operator,
            value: ConstraintValue::One(value),
        }
    }

    pub fn not_deleted() -> Self {
        Self::compare(DELETED_COLUMN, Operator::Eq, Value::Bool(false))
    }

    fn from_filter(filter: &ValidFilter) -> Self {
        let column = &filter.attribute().field;
        let mut compares: Vec<Predicate> = filter
            .constraints
            .iter()
            .map(|Constraint { operator, value }| Predicate::Compare {
                column: column.clone(),
                operator: *operator,
                value: value.clone(),
            })
            .collect();

        let mut predicate = if compares.len() == 1 {
            compares.remove(0)
        } else {
            Predicate::Group {
                logical: filter.logical,
                predicates: compares,
            }
        };

        // Wrap from the terminal entity back out to the root.
        for step in filter.path.steps.iter().rev() {
            predicate = Predicate::Related {
                column: step.column.clone(),
                table: step.target_table.clone(),
                key: step.target_key.clone(),
                inner: Box::new(predicate),
            };
        }
        predicate
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    pub table: String,
    pub columns: Vec<String>,
    /// Combined with AND.
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    /// Column whose generated value the insert returns.
    pub returning: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub predicates: Vec<Predicate>,
}

/// Page request for list queries.
#[derive(Clone, Debug, PartialEq)]
pub enum Page {
    Offset { offset: u64, limit: Option<u32> },
    /// Keyset pagination: rows whose key is strictly greater than `cursor`.
    After { cursor: String, limit: Option<u32> },
}

impl Default for Page {
    fn default() -> Self {
        Page::Offset {
            offset: 0,
            limit: None,
        }
    }
}

impl Page {
    pub fn limit(&self) -> Option<u32> {
        match self {
            Page::Offset { limit, .. } | Page::After { limit, .. } => *limit,
        }
    }
}

/// A named, declarative list query. Holds no connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    pub entity_name: String,
    #[serde(default)]
    pub selection: Vec<String>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct QueryBuilder {
    max_page_size: u32,
}

impl QueryBuilder {
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            max_page_size: config.max_page_size.max(1),
        }
    }

    fn page_limit(&self, entity: &Entity, requested: Option<u32>) -> u32 {
        clamp_limit(
            requested.unwrap_or(entity.default_page_size()),
            self.max_page_size,
        )
    }

    /// Resolve requested attribute names, defaulting to the view's subset.
    /// The key is always selected.
    pub fn resolve_selection(
        &self,
        entity: &Entity,
        names: &[String],
        view: View,
    ) -> ShardlineResult<Vec<String>> {
        let mut columns: Vec<String> = if names.is_empty() {
            entity
                .attributes_for(view, None)
                .into_iter()
                .map(|a| a.field.clone())
                .collect()
        } else {
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                if entity.attribute(name).is_none() {
                    return Err(ShardlineError::validation(
                        entity.name(),
                        format!("unknown attribute '{name}' in selection"),
                    ));
                }
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            out
        };

        let key = entity.primary_key_field();
        if !columns.iter().any(|c| c == key) {
            columns.insert(0, key.to_string());
        }
        Ok(columns)
    }

    fn cast_key(entity: &Entity, id: &str) -> ShardlineResult<Value> {
        let key = entity.key_attribute()?;
        key.cast(id)
            .map_err(|e| ShardlineError::validation(entity.name(), e))
    }

    fn require_selection(entity: &Entity, selection: &[String]) -> ShardlineResult<()> {
        if selection.is_empty() {
            return Err(ShardlineError::validation(entity.name(), "empty selection"));
        }
        Ok(())
    }

    /// Single-record lookup by primary key.
    pub fn single(
        &self,
        entity: &Entity,
        selection: &[String],
        id: &str,
    ) -> ShardlineResult<SelectStatement> {
        Self::require_selection(entity, selection)?;
        let key = Self::cast_key(entity, id)?;
        Ok(SelectStatement {
            table: entity.table_name().to_string(),
            columns: selection.to_vec(),
            predicates: vec![
                Predicate::compare(entity.primary_key_field(), Operator::Eq, key),
                Predicate::not_deleted(),
            ],
            order_by: Vec::new(),
            limit: Some(1),
            offset: None,
        })
    }

    /// Filtered, sorted, paginated list. `None` when there is nothing to
    /// project.
    pub fn list(
        &self,
        entity: &Entity,
        selection: &[String],
        filters: &[ValidFilter],
        sorts: &[ValidSort],
        page: &Page,
    ) -> ShardlineResult<Option<SelectStatement>> {
        if selection.is_empty() {
            return Ok(None);
        }

        let key_field = entity.primary_key_field();
        let mut predicates: Vec<Predicate> = filters.iter().map(Predicate::from_filter).collect();
        predicates.push(Predicate::not_deleted());

        let mut order_by: Vec<OrderBy> = sorts
            .iter()
            .map(|s| OrderBy {
                column: s.attribute.field.clone(),
                direction: s.direction,
            })
            .collect();

        let limit = self.page_limit(entity, page.limit());
        let offset = match page {
            Page::Offset { offset, .. } => {
                if !order_by.iter().any(|o| o.column == key_field) {
                    // Stable ordering for offset paging.
                    order_by.push(OrderBy {
                        column: key_field.to_string(),
                        direction: Direction::Asc,
                    });
                }
                (*offset > 0).then_some(*offset)
            }
            Page::After { cursor, .. } => {
                if !order_by.is_empty() {
                    return Err(ShardlineError::validation(
                        entity.name(),
                        "cursor pagination orders by key and cannot be combined with sorts",
                    ));
                }
                let cursor = Self::cast_key(entity, cursor)?;
                predicates.push(Predicate::compare(key_field, Operator::Gt, cursor));
                order_by.push(OrderBy {
                    column: key_field.to_string(),
                    direction: Direction::Asc,
                });
                None
            }
        };

        Ok(Some(SelectStatement {
            table: entity.table_name().to_string(),
            columns: selection.to_vec(),
            predicates,
            order_by,
            limit: Some(limit),
            offset,
        }))
    }

    /// Batch lookup by a set of primary keys.
    pub fn many(
        &self,
        entity: &Entity,
        selection: &[String],
        ids: &[String],
    ) -> ShardlineResult<SelectStatement> {
        Self::require_selection(entity, selection)?;
        if ids.len() > MAX_MANY_KEYS {
            return Err(ShardlineError::validation(
                entity.name(),
                format!("more than {MAX_MANY_KEYS} keys requested"),
            ));
        }
        let keys = ids
            .iter()
            .map(|id| Self::cast_key(entity, id))
            .collect::<ShardlineResult<Vec<_>>>()?;
        Ok(SelectStatement {
            table: entity.table_name().to_string(),
            columns: selection.to_vec(),
            predicates: vec![
                Predicate::Compare {
                    column: entity.primary_key_field().to_string(),
                    operator: Operator::In,
                    value: ConstraintValue::Many(keys),
                },
                Predicate::not_deleted(),
            ],
            order_by: Vec::new(),
            limit: None,
            offset: None,
        })
    }

    fn coerce(entity: &Entity, attr: &Attribute, value: &Value) -> ShardlineResult<Value> {
        match value.to_text() {
            None if attr.optional => Ok(Value::Null),
            None => Err(ShardlineError::validation(
                entity.name(),
                format!("field '{}' is required", attr.field),
            )),
            Some(text) => attr
                .cast(&text)
                .map_err(|e| ShardlineError::validation(entity.name(), e)),
        }
    }

    fn known_attribute<'a>(entity: &'a Entity, field: &str) -> ShardlineResult<&'a Attribute> {
        entity.attribute(field).ok_or_else(|| {
            ShardlineError::validation(entity.name(), format!("unknown field '{field}'"))
        })
    }

    /// Insert statement returning the generated key.
    pub fn insert(&self, entity: &Entity, record: &Record) -> ShardlineResult<InsertStatement> {
        let key_field = entity.primary_key_field();
        let key_attr = entity.key_attribute()?;

        let mut columns = Vec::with_capacity(record.len() + 1);
        let mut values = Vec::with_capacity(record.len() + 1);
        for (field, value) in record {
            let attr = Self::known_attribute(entity, field)?;
            if field == key_field && value.is_null() && key_attr.data_type == DataType::Int {
                continue;
            }
            columns.push(field.clone());
            values.push(Self::coerce(entity, attr, value)?);
        }

        for attr in entity.attributes() {
            if attr.optional || record.contains_key(&attr.field) {
                continue;
            }
            if attr.field == key_field && key_attr.data_type == DataType::Int {
                continue;
            }
            return Err(ShardlineError::validation(
                entity.name(),
                format!("field '{}' is required", attr.field),
            ));
        }

        columns.push(DELETED_COLUMN.to_string());
        values.push(Value::Bool(false));

        Ok(InsertStatement {
            table: entity.table_name().to_string(),
            columns,
            values,
            returning: key_field.to_string(),
        })
    }

    /// Update by primary key. `None` when the record carries no key or no
    /// other fields, which signals caller misuse without failing.
    pub fn update(
        &self,
        entity: &Entity,
        record: &Record,
    ) -> ShardlineResult<Option<UpdateStatement>> {
        let key_field = entity.primary_key_field();
        let key = match record.get(key_field).and_then(Value::to_text) {
            Some(id) => Self::cast_key(entity, &id)?,
            None => return Ok(None),
        };

        let mut assignments = Vec::with_capacity(record.len());
        for (field, value) in record {
            if field == key_field {
                continue;
            }
            let attr = Self::known_attribute(entity, field)?;
            assignments.push((field.clone(), Self::coerce(entity, attr, value)?));
        }
        if assignments.is_empty() {
            return Ok(None);
        }

        Ok(Some(UpdateStatement {
            table: entity.table_name().to_string(),
            assignments,
            predicates: vec![
                Predicate::compare(key_field, Operator::Eq, key),
                Predicate::not_deleted(),
            ],
        }))
    }

    /// Flag a record as deleted instead of removing the row.
    pub fn soft_delete(&self, entity: &Entity, id: &str) -> ShardlineResult<UpdateStatement> {
        let key = Self::cast_key(entity, id)?;
        Ok(UpdateStatement {
            table: entity.table_name().to_string(),
            assignments: vec![(DELETED_COLUMN.to_string(), Value::Bool(true))],
            predicates: vec![
                Predicate::compare(entity.primary_key_field(), Operator::Eq, key),
                Predicate::not_deleted(),
            ],
        })
    }

    /// Build the list statement for a named query.
    pub fn from_query(
        &self,
        registry: &SchemaRegistry,
        query: &Query,
        page: &Page,
    ) -> ShardlineResult<Option<SelectStatement>> {
        let entity = registry.entity(&query.entity_name)?;
        let selection = self.resolve_selection(&entity, &query.selection, View::List)?;
        let filters = validate_filters(&entity, &query.filters, registry)?;
        let sorts = validate_sorts(&entity, &query.sorts, registry)?;

        let page = match page {
            Page::Offset { offset, limit } => Page::Offset {
                offset: *offset,
                limit: limit.or(query.page_size),
            },
            Page::After { cursor, limit } => Page::After {
                cursor: cursor.clone(),
                limit: limit.or(query.page_size),
            },
        };
        self.list(&entity, &selection, &filters, &sorts, &page)
    }
}
