pub mod entity;
pub mod registry;

pub use entity::{Attribute, Caster, DataType, Entity, EntityDefinition, View};
pub use registry::{LocalResolver, PathResolver, RelationStep, ResolvedPath, SchemaRegistry};
