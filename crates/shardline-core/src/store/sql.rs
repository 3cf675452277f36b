//! SQLite rendering of the neutral statement model.
//!
//! Every value is bound as a `?N` positional parameter; identifiers are
//! checked and double-quoted.

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::{Value, DELETED_COLUMN};
use crate::query::{
    ConstraintValue, InsertStatement, Operator, Predicate, SelectStatement, UpdateStatement,
};
use crate::schema::entity::is_identifier;

pub type Rendered = (String, Vec<Value>);

pub fn quote(ident: &str) -> ShardlineResult<String> {
    if !is_identifier(ident) {
        return Err(ShardlineError::Schema(format!("invalid identifier '{ident}'")));
    }
    Ok(format!("\"{ident}\""))
}

/// Escape LIKE wildcards; pairs with `ESCAPE '\'`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Default)]
struct Renderer {
    params: Vec<Value>,
}

impl Renderer {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    fn one<'a>(operator: Operator, value: &'a ConstraintValue) -> ShardlineResult<&'a Value> {
        match value {
            ConstraintValue::One(v) => Ok(v),
            ConstraintValue::Many(_) => Err(ShardlineError::Database(format!(
                "operator '{operator}' takes a single value"
            ))),
        }
    }

    fn compare(
        &mut self,
        column: &str,
        operator: Operator,
        value: &ConstraintValue,
    ) -> ShardlineResult<String> {
        let col = quote(column)?;
        let binary = |sym: &str, r: &mut Self| -> ShardlineResult<String> {
            let v = Self::one(operator, value)?.clone();
            Ok(format!("{col} {sym} {}", r.bind(v)))
        };
        match operator {
            Operator::Eq => binary("=", self),
            Operator::Neq => binary("<>", self),
            Operator::Gt => binary(">", self),
            Operator::Gte => binary(">=", self),
            Operator::Lt => binary("<", self),
            Operator::Lte => binary("<=", self),
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let raw = Self::one(operator, value)?.to_text().unwrap_or_default();
                let escaped = escape_like(&raw);
                let pattern = match operator {
                    Operator::Contains => format!("%{escaped}%"),
                    Operator::StartsWith => format!("{escaped}%"),
                    _ => format!("%{escaped}"),
                };
                Ok(format!("{col} LIKE {} ESCAPE '\\'", self.bind(Value::Text(pattern))))
            }
            Operator::In | Operator::NotIn => {
                let values = match value {
                    ConstraintValue::Many(values) => values.clone(),
                    ConstraintValue::One(v) => vec![v.clone()],
                };
                if values.is_empty() {
                    // Empty IN matches nothing; empty NOT IN matches everything.
                    return Ok(if operator == Operator::In { "0" } else { "1" }.to_string());
                }
                let slots: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
                let keyword = if operator == Operator::In { "IN" } else { "NOT IN" };
                Ok(format!("{col} {keyword} ({})", slots.join(", ")))
            }
            Operator::IsNull => {
                let flag = matches!(Self::one(operator, value)?, Value::Bool(true));
                Ok(if flag {
                    format!("{col} IS NULL")
                } else {
                    format!("{col} IS NOT NULL")
                })
            }
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> ShardlineResult<String> {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                value,
            } => self.compare(column, *operator, value),
            Predicate::Related {
                column,
                table,
                key,
                inner,
            } => {
                let inner_sql = self.predicate(inner)?;
                let deleted = self.bind(Value::Bool(false));
                Ok(format!(
                    "{} IN (SELECT {} FROM {} WHERE {inner_sql} AND {} = {deleted})",
                    quote(column)?,
                    quote(key)?,
                    quote(table)?,
                    quote(DELETED_COLUMN)?,
                ))
            }
            Predicate::Group {
                logical,
                predicates,
            } => {
                if predicates.is_empty() {
                    return Ok("1".to_string());
                }
                let parts = predicates
                    .iter()
                    .map(|p| self.predicate(p))
                    .collect::<ShardlineResult<Vec<_>>>()?;
                Ok(format!("({})", parts.join(&format!(" {} ", logical.as_sql()))))
            }
        }
    }

    fn where_clause(&mut self, predicates: &[Predicate]) -> ShardlineResult<String> {
        if predicates.is_empty() {
            return Ok(String::new());
        }
        let parts = predicates
            .iter()
            .map(|p| self.predicate(p))
            .collect::<ShardlineResult<Vec<_>>>()?;
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

fn column_list(columns: &[String]) -> ShardlineResult<String> {
    Ok(columns
        .iter()
        .map(|c| quote(c))
        .collect::<ShardlineResult<Vec<_>>>()?
        .join(", "))
}

pub fn render_select(stmt: &SelectStatement) -> ShardlineResult<Rendered> {
    let mut r = Renderer::default();
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(&stmt.columns)?,
        quote(&stmt.table)?
    );
    sql.push_str(&r.where_clause(&stmt.predicates)?);

    if !stmt.order_by.is_empty() {
        let parts = stmt
            .order_by
            .iter()
            .map(|o| Ok(format!("{} {}", quote(&o.column)?, o.direction.as_sql())))
            .collect::<ShardlineResult<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
    }
    match (stmt.limit, stmt.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        // SQLite only accepts OFFSET after a LIMIT.
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
    Ok((sql, r.params))
}

pub fn render_insert(stmt: &InsertStatement) -> ShardlineResult<Rendered> {
    let mut r = Renderer::default();
    let slots: Vec<String> = stmt.values.iter().map(|v| r.bind(v.clone())).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quote(&stmt.table)?,
        column_list(&stmt.columns)?,
        slots.join(", "),
        quote(&stmt.returning)?
    );
    Ok((sql, r.params))
}

pub fn render_update(stmt: &UpdateStatement) -> ShardlineResult<Rendered> {
    if stmt.assignments.is_empty() {
        return Err(ShardlineError::Database(format!(
            "update of '{}' has no assignments",
            stmt.table
        )));
    }
    let mut r = Renderer::default();
    let sets = stmt
        .assignments
        .iter()
        .map(|(column, value)| Ok(format!("{} = {}", quote(column)?, r.bind(value.clone()))))
        .collect::<ShardlineResult<Vec<_>>>()?;
    let mut sql = format!("UPDATE {} SET {}", quote(&stmt.table)?, sets.join(", "));
    sql.push_str(&r.where_clause(&stmt.predicates)?);
    Ok((sql, r.params))
}
