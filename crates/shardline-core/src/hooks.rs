//! Per-entity lifecycle hooks.
//!
//! Handlers are registered explicitly against one entity or against every
//! entity. Wildcard handlers are copied into each entity's list when they
//! are registered, and entities added later are seeded with the wildcard
//! handlers registered so far. Dispatch reads one entity's list, or the
//! wildcard list for an entity the registry has never seen.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::ShardlineResult;
use crate::models::{Operation, Record};
use crate::query::SelectStatement;
use crate::schema::{Entity, SchemaRegistry};

pub type BeforeListHook =
    Arc<dyn Fn(&Entity, &mut SelectStatement) -> ShardlineResult<()> + Send + Sync>;
pub type AfterReadHook = Arc<dyn Fn(&Entity, &mut Vec<Record>) -> ShardlineResult<()> + Send + Sync>;
pub type BeforeWriteHook =
    Arc<dyn Fn(&Entity, Operation, &mut Record) -> ShardlineResult<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeList,
    AfterRead,
    BeforeWrite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookTarget {
    Entity(String),
    All,
}

impl HookTarget {
    pub fn entity(name: impl Into<String>) -> Self {
        HookTarget::Entity(name.into())
    }
}

#[derive(Clone, Default)]
struct HookLists {
    before_list: Vec<BeforeListHook>,
    after_read: Vec<AfterReadHook>,
    before_write: Vec<BeforeWriteHook>,
}

impl HookLists {
    fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::BeforeList => self.before_list.len(),
            HookKind::AfterRead => self.after_read.len(),
            HookKind::BeforeWrite => self.before_write.len(),
        }
    }
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    entities: HashMap<String, HookLists>,
    wildcard: HookLists,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with one (empty) list per entity of `schema`.
    pub fn for_schema(schema: &SchemaRegistry) -> Self {
        let mut hooks = Self::new();
        for name in schema.names() {
            hooks.add_entity(name);
        }
        hooks
    }

    /// Make `name` known, seeding it with the current wildcard handlers.
    pub fn add_entity(&mut self, name: &str) {
        if !self.entities.contains_key(name) {
            self.entities.insert(name.to_string(), self.wildcard.clone());
        }
    }

    fn lists_for(&mut self, target: &HookTarget) -> Vec<&mut HookLists> {
        match target {
            HookTarget::All => {
                let mut lists: Vec<&mut HookLists> = self.entities.values_mut().collect();
                lists.push(&mut self.wildcard);
                lists
            }
            HookTarget::Entity(name) => {
                self.add_entity(name);
                self.entities.get_mut(name).into_iter().collect()
            }
        }
    }

    pub fn register_before_list(&mut self, target: HookTarget, hook: BeforeListHook) {
        for lists in self.lists_for(&target) {
            lists.before_list.push(Arc::clone(&hook));
        }
    }

    pub fn register_after_read(&mut self, target: HookTarget, hook: AfterReadHook) {
        for lists in self.lists_for(&target) {
            lists.after_read.push(Arc::clone(&hook));
        }
    }

    pub fn register_before_write(&mut self, target: HookTarget, hook: BeforeWriteHook) {
        for lists in self.lists_for(&target) {
            lists.before_write.push(Arc::clone(&hook));
        }
    }

    fn lists(&self, entity: &str) -> &HookLists {
        self.entities.get(entity).unwrap_or(&self.wildcard)
    }

    /// Number of handlers of `kind` that dispatch would run for `entity`.
    pub fn count(&self, kind: HookKind, entity: &str) -> usize {
        self.lists(entity).len(kind)
    }

    pub fn run_before_list(&self, entity: &Entity, stmt: &mut SelectStatement) -> ShardlineResult<()> {
        for hook in &self.lists(entity.name()).before_list {
            hook(entity, stmt)?;
        }
        Ok(())
    }

    pub fn run_after_read(&self, entity: &Entity, records: &mut Vec<Record>) -> ShardlineResult<()> {
        for hook in &self.lists(entity.name()).after_read {
            hook(entity, records)?;
        }
        Ok(())
    }

    pub fn run_before_write(
        &self,
        entity: &Entity,
        operation: Operation,
        record: &mut Record,
    ) -> ShardlineResult<()> {
        for hook in &self.lists(entity.name()).before_write {
            hook(entity, operation, record)?;
        }
        Ok(())
    }
}
