pub mod database;
pub mod migrator;
pub mod sharding;
pub mod sql;

pub use database::Database;
pub use migrator::{Migrator, SqliteMigrator};
