//! Constructed-once schema registry and relation path resolution.
//!
//! The registry is an explicit value handed to every component that needs
//! entity metadata. It is never mutated after construction: `with_entity`
//! returns a fresh registry so requests holding the old one keep a
//! consistent view.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::{ShardlineError, ShardlineResult};
use crate::query::guards::{MAX_FIELD_PATH_LENGTH, MAX_RELATION_DEPTH};
use crate::schema::entity::{Attribute, Entity, EntityDefinition};

// ---------------------------------------------------------------------------
// Resolved paths
// ---------------------------------------------------------------------------

/// One hop across a to-one relation.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationStep {
    /// Foreign-key column on the entity the hop starts from.
    pub column: String,
    pub target_entity: String,
    pub target_table: String,
    pub target_key: String,
}

/// A field path bound to its terminal attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPath {
    pub path: String,
    pub steps: Vec<RelationStep>,
    pub attribute: Attribute,
}

impl ResolvedPath {
    pub fn is_local(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Resolves a dotted field path (`author.name`) to a terminal attribute.
pub trait PathResolver {
    fn resolve(&self, entity: &Entity, path: &str) -> ShardlineResult<ResolvedPath>;
}

fn unknown_path(entity: &Entity, path: &str) -> ShardlineError {
    ShardlineError::validation(entity.name(), format!("unknown field path '{path}'"))
}

/// Resolver for paths that never leave the entity.
pub struct LocalResolver;

impl PathResolver for LocalResolver {
    fn resolve(&self, entity: &Entity, path: &str) -> ShardlineResult<ResolvedPath> {
        let attribute = entity
            .attribute(path)
            .ok_or_else(|| unknown_path(entity, path))?;
        Ok(ResolvedPath {
            path: path.to_string(),
            steps: Vec::new(),
            attribute: attribute.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    entities: IndexMap<String, Arc<Entity>>,
}

impl SchemaRegistry {
    /// Build a registry from already-constructed entities.
    pub fn new(entities: Vec<Entity>) -> ShardlineResult<Self> {
        let mut map = IndexMap::new();
        for entity in entities {
            let name = entity.name().to_string();
            if map.insert(name.clone(), Arc::new(entity)).is_some() {
                return Err(ShardlineError::Schema(format!("duplicate entity '{name}'")));
            }
        }
        let registry = Self { entities: map };
        registry.check_relations()?;
        Ok(registry)
    }

    pub fn from_definitions(definitions: Vec<EntityDefinition>) -> ShardlineResult<Self> {
        let entities = definitions
            .into_iter()
            .map(EntityDefinition::build)
            .collect::<ShardlineResult<Vec<_>>>()?;
        Self::new(entities)
    }

    /// Parse a JSON array of entity definitions.
    pub fn from_json_str(json: &str) -> ShardlineResult<Self> {
        let definitions: Vec<EntityDefinition> = serde_json::from_str(json)?;
        Self::from_definitions(definitions)
    }

    pub fn load_file(path: &Path) -> ShardlineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Every relation attribute must point at a registered entity.
    fn check_relations(&self) -> ShardlineResult<()> {
        for entity in self.entities.values() {
            for attr in entity.attributes() {
                if let Some(target) = attr.data_type.related_entity() {
                    if !self.entities.contains_key(target) {
                        return Err(ShardlineError::Schema(format!(
                            "entity '{}': relation '{}' targets unknown entity '{target}'",
                            entity.name(),
                            attr.field
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up an entity by name; unknown names are a caller error.
    pub fn entity(&self, name: &str) -> ShardlineResult<Arc<Entity>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| ShardlineError::validation(name, "unknown entity"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Return a new registry with `entity` added or replaced.
    pub fn with_entity(&self, entity: Entity) -> ShardlineResult<Self> {
        let mut entities = self.entities.clone();
        entities.insert(entity.name().to_string(), Arc::new(entity));
        let registry = Self { entities };
        registry.check_relations()?;
        Ok(registry)
    }
}

impl PathResolver for SchemaRegistry {
    fn resolve(&self, entity: &Entity, path: &str) -> ShardlineResult<ResolvedPath> {
        if path.is_empty() || path.len() > MAX_FIELD_PATH_LENGTH {
            return Err(unknown_path(entity, path));
        }
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() > MAX_RELATION_DEPTH + 1 {
            return Err(ShardlineError::validation(
                entity.name(),
                format!("field path '{path}' exceeds relation depth {MAX_RELATION_DEPTH}"),
            ));
        }

        let mut steps = Vec::new();
        let mut current: &Entity = entity;

        let (last, hops) = segments
            .split_last()
            .ok_or_else(|| unknown_path(entity, path))?;
        for segment in hops {
            let attr = current
                .attribute(segment)
                .ok_or_else(|| unknown_path(entity, path))?;
            let target_name = attr
                .data_type
                .related_entity()
                .ok_or_else(|| unknown_path(entity, path))?;
            let target = self
                .entities
                .get(target_name)
                .ok_or_else(|| unknown_path(entity, path))?;
            steps.push(RelationStep {
                column: attr.field.clone(),
                target_entity: target.name().to_string(),
                target_table: target.table_name().to_string(),
                target_key: target.primary_key_field().to_string(),
            });
            current = target.as_ref();
        }

        let attribute = current
            .attribute(last)
            .ok_or_else(|| unknown_path(entity, path))?;
        Ok(ResolvedPath {
            path: path.to_string(),
            steps,
            attribute: attribute.clone(),
        })
    }
}
