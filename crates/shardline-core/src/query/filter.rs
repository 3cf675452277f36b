//! Filter and sort validation.
//!
//! Turns untyped, user-supplied field paths and operator/value pairs into
//! attribute-bound, type-checked predicates and orderings. Every failure is a
//! `Validation` error naming the entity; nothing here touches storage.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::Value;
use crate::query::guards::MAX_IN_VALUES;
use crate::schema::{Attribute, Entity, PathResolver, ResolvedPath};

/// Reserved argument-bag key carrying the logical operator.
pub const LOGICAL_KEY: &str = "logical";

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logical {
    #[default]
    And,
    Or,
}

impl Logical {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "and" => Some(Logical::And),
            "or" => Some(Logical::Or),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Logical::And => "AND",
            Logical::Or => "OR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
}

impl Operator {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "contains" => Operator::Contains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "is_null" => Operator::IsNull,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
        }
    }

    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw and validated forms
// ---------------------------------------------------------------------------

/// One `{operator: raw value}` pair as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawConstraint {
    pub operator: String,
    pub value: serde_json::Value,
}

/// A filter before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field_path: String,
    #[serde(default)]
    pub logical: Logical,
    pub constraints: Vec<RawConstraint>,
    #[serde(default)]
    pub omit_on_empty: bool,
}

impl Filter {
    pub fn new(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            logical: Logical::And,
            constraints: Vec::new(),
            omit_on_empty: false,
        }
    }

    pub fn with(mut self, operator: &str, value: serde_json::Value) -> Self {
        self.constraints.push(RawConstraint {
            operator: operator.to_string(),
            value,
        });
        self
    }

    pub fn or(mut self) -> Self {
        self.logical = Logical::Or;
        self
    }

    pub fn omit_on_empty(mut self) -> Self {
        self.omit_on_empty = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintValue {
    One(Value),
    Many(Vec<Value>),
}

/// An operator with its value already cast to the attribute's storage type.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub operator: Operator,
    pub value: ConstraintValue,
}

/// A filter bound to a resolved attribute path.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidFilter {
    pub path: ResolvedPath,
    pub logical: Logical,
    pub constraints: Vec<Constraint>,
}

impl ValidFilter {
    pub fn attribute(&self) -> &Attribute {
        &self.path.attribute
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field_path: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidSort {
    pub attribute: Attribute,
    pub direction: Direction,
}

/// Parse `title` / `+title` (ascending) or `-title` (descending).
pub fn parse_sort(raw: &str) -> Sort {
    let raw = raw.trim();
    if let Some(field) = raw.strip_prefix('-') {
        Sort {
            field_path: field.to_string(),
            direction: Direction::Desc,
        }
    } else {
        Sort {
            field_path: raw.strip_prefix('+').unwrap_or(raw).to_string(),
            direction: Direction::Asc,
        }
    }
}

// ---------------------------------------------------------------------------
// Argument bags
// ---------------------------------------------------------------------------

/// Convert a `field path -> argument bag` mapping into raw filters.
///
/// A bag is either an object of `{operator: value}` pairs, optionally with
/// the reserved `logical` key, or a bare scalar which is shorthand for `eq`.
pub fn filters_from_arguments(
    entity: &Entity,
    arguments: &IndexMap<String, serde_json::Value>,
    omit_on_empty: bool,
) -> ShardlineResult<Vec<Filter>> {
    let mut filters = Vec::with_capacity(arguments.len());
    for (path, bag) in arguments {
        let mut filter = Filter::new(path.clone());
        filter.omit_on_empty = omit_on_empty;
        match bag {
            serde_json::Value::Object(pairs) => {
                for (key, value) in pairs {
                    if key == LOGICAL_KEY {
                        let raw = value.as_str().unwrap_or_default();
                        filter.logical = Logical::parse(raw).ok_or_else(|| {
                            ShardlineError::validation(
                                entity.name(),
                                format!("field path '{path}': invalid logical operator {value}"),
                            )
                        })?;
                    } else {
                        filter.constraints.push(RawConstraint {
                            operator: key.clone(),
                            value: value.clone(),
                        });
                    }
                }
            }
            scalar => filter.constraints.push(RawConstraint {
                operator: Operator::Eq.as_str().to_string(),
                value: scalar.clone(),
            }),
        }
        filters.push(filter);
    }
    Ok(filters)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn is_empty_raw(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn cast_constraint(
    entity: &Entity,
    path: &ResolvedPath,
    operator: Operator,
    raw: &serde_json::Value,
) -> ShardlineResult<ConstraintValue> {
    let attr = &path.attribute;
    let fail = |message: String| {
        ShardlineError::validation(
            entity.name(),
            format!("field path '{}', operator '{operator}': {message}", path.path),
        )
    };

    match operator {
        Operator::IsNull => {
            let flag = match raw {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(fail(format!("expected a boolean, got '{s}'"))),
                },
                other => return Err(fail(format!("expected a boolean, got {other}"))),
            };
            Ok(ConstraintValue::One(Value::Bool(flag)))
        }
        Operator::In | Operator::NotIn => {
            let items: Vec<&serde_json::Value> = match raw {
                serde_json::Value::Array(items) => items.iter().collect(),
                scalar => vec![scalar],
            };
            if items.len() > MAX_IN_VALUES {
                return Err(fail(format!("more than {MAX_IN_VALUES} values")));
            }
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let value = attr.cast_json(item).map_err(fail)?;
                if value.is_null() {
                    return Err(fail("null is not allowed in a list, use is_null".into()));
                }
                values.push(value);
            }
            Ok(ConstraintValue::Many(values))
        }
        _ => {
            if operator.is_pattern() && !attr.data_type.is_textual() {
                return Err(fail(format!(
                    "pattern operators require a text attribute, '{}' is {:?}",
                    attr.field, attr.data_type
                )));
            }
            let value = attr.cast_json(raw).map_err(fail)?;
            if value.is_null() {
                return Err(fail("null comparison is not allowed, use is_null".into()));
            }
            Ok(ConstraintValue::One(value))
        }
    }
}

/// Bind filters to attributes and cast their values.
///
/// Filters left with no constraints (for instance because every value was
/// empty and `omit_on_empty` is set) are dropped rather than turned into an
/// exclude-everything predicate.
pub fn validate_filters(
    entity: &Entity,
    filters: &[Filter],
    resolver: &dyn PathResolver,
) -> ShardlineResult<Vec<ValidFilter>> {
    let mut valid = Vec::with_capacity(filters.len());
    for filter in filters {
        let path = resolver.resolve(entity, &filter.field_path)?;

        let mut constraints = Vec::with_capacity(filter.constraints.len());
        for raw in &filter.constraints {
            let operator = Operator::parse(&raw.operator).ok_or_else(|| {
                ShardlineError::validation(
                    entity.name(),
                    format!(
                        "field path '{}': unknown operator '{}'",
                        filter.field_path, raw.operator
                    ),
                )
            })?;
            if filter.omit_on_empty && is_empty_raw(&raw.value) {
                continue;
            }
            let value = cast_constraint(entity, &path, operator, &raw.value)?;
            constraints.push(Constraint { operator, value });
        }

        if constraints.is_empty() {
            continue;
        }
        valid.push(ValidFilter {
            path,
            logical: filter.logical,
            constraints,
        });
    }
    Ok(valid)
}

/// Bind sorts to attributes of the entity itself.
pub fn validate_sorts(
    entity: &Entity,
    sorts: &[Sort],
    resolver: &dyn PathResolver,
) -> ShardlineResult<Vec<ValidSort>> {
    sorts
        .iter()
        .map(|sort| {
            let path = resolver.resolve(entity, &sort.field_path)?;
            if !path.is_local() {
                return Err(ShardlineError::validation(
                    entity.name(),
                    format!("cannot sort across relation path '{}'", sort.field_path),
                ));
            }
            Ok(ValidSort {
                attribute: path.attribute,
                direction: sort.direction,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::schema::{LocalResolver, SchemaRegistry};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_json_str(
            r#"[
            {"name": "user", "table_name": "users", "attributes": [
                {"field": "id", "data_type": "int"},
                {"field": "name", "data_type": "text"}
            ]},
            {"name": "post", "table_name": "posts", "label_field": "title", "attributes": [
                {"field": "id", "data_type": "int"},
                {"field": "title", "data_type": "text"},
                {"field": "views", "data_type": "int"},
                {"field": "published", "data_type": "bool"},
                {"field": "author", "data_type": {"relation": {"entity": "user"}}}
            ]}
        ]"#,
        )
        .unwrap()
    }

    fn args(value: serde_json::Value) -> IndexMap<String, serde_json::Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn bags_become_typed_constraints() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let raw = filters_from_arguments(
            &post,
            &args(json!({
                "views": {"gt": "10", "lt": 100, "logical": "or"},
                "published": true
            })),
            false,
        )
        .unwrap();

        let valid = validate_filters(&post, &raw, &registry).unwrap();
        assert_eq!(valid.len(), 2);
        let by_field = |field: &str| {
            valid
                .iter()
                .find(|f| f.attribute().field == field)
                .unwrap()
                .clone()
        };

        let views = by_field("views");
        assert_eq!(views.logical, Logical::Or);
        assert_eq!(
            views.constraints,
            vec![
                Constraint {
                    operator: Operator::Gt,
                    value: ConstraintValue::One(Value::Int(10)),
                },
                Constraint {
                    operator: Operator::Lt,
                    value: ConstraintValue::One(Value::Int(100)),
                },
            ]
        );

        let published = by_field("published");
        assert_eq!(published.logical, Logical::And);
        assert_eq!(published.constraints[0].operator, Operator::Eq);
        assert_eq!(
            published.constraints[0].value,
            ConstraintValue::One(Value::Bool(true))
        );
    }

    #[test]
    fn unknown_path_fails_validation() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![Filter::new("body").with("contains", json!("foo"))];
        let err = validate_filters(&post, &filters, &registry).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("body"));
    }

    #[test]
    fn cast_failure_is_validation_not_panic() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![Filter::new("views").with("gte", json!("lots"))];
        let err = validate_filters(&post, &filters, &registry).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("views"));
    }

    #[test]
    fn unknown_operator_and_logical_rejected() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![Filter::new("views").with("between", json!("1"))];
        assert!(validate_filters(&post, &filters, &registry).is_err());

        let err =
            filters_from_arguments(&post, &args(json!({"views": {"logical": "xor"}})), false)
                .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_filters_are_dropped() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let raw = filters_from_arguments(
            &post,
            &args(json!({"title": {"contains": ""}, "views": {"in": []}, "id": {"logical": "and"}})),
            true,
        )
        .unwrap();
        let valid = validate_filters(&post, &raw, &registry).unwrap();
        assert!(valid.is_empty());
    }

    #[test]
    fn list_operators_promote_scalars() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![
            Filter::new("id").with("in", json!(["1", 2])),
            Filter::new("views").with("not_in", json!(5)),
        ];
        let valid = validate_filters(&post, &filters, &registry).unwrap();
        assert_eq!(
            valid[0].constraints[0].value,
            ConstraintValue::Many(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            valid[1].constraints[0].value,
            ConstraintValue::Many(vec![Value::Int(5)])
        );
    }

    #[test]
    fn pattern_operators_need_text() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![Filter::new("views").with("contains", json!("1"))];
        assert!(validate_filters(&post, &filters, &registry).is_err());
    }

    #[test]
    fn relation_paths_resolve_through_registry_only() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let filters = vec![Filter::new("author.name").with("eq", json!("ada"))];

        let valid = validate_filters(&post, &filters, &registry).unwrap();
        assert_eq!(valid[0].path.steps.len(), 1);
        assert_eq!(valid[0].attribute().field, "name");

        assert!(validate_filters(&post, &filters, &LocalResolver).is_err());
    }

    #[test]
    fn null_comparisons_require_is_null() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let bad = vec![Filter::new("title").with("eq", json!(null))];
        assert!(validate_filters(&post, &bad, &registry).is_err());

        let good = vec![Filter::new("title").with("is_null", json!("false"))];
        let valid = validate_filters(&post, &good, &registry).unwrap();
        assert_eq!(
            valid[0].constraints[0].value,
            ConstraintValue::One(Value::Bool(false))
        );
    }

    #[test]
    fn sorts_resolve_locally() {
        let registry = registry();
        let post = registry.entity("post").unwrap();
        let sorts = vec![parse_sort("-views"), parse_sort("+title")];
        let valid = validate_sorts(&post, &sorts, &registry).unwrap();
        assert_eq!(valid[0].attribute.field, "views");
        assert_eq!(valid[0].direction, Direction::Desc);
        assert_eq!(valid[1].direction, Direction::Asc);

        assert!(validate_sorts(&post, &[parse_sort("author.name")], &registry).is_err());
        assert!(validate_sorts(&post, &[parse_sort("nope")], &registry).is_err());
    }
}
