//! Error types for the shardline core library.

/// Top-level error enum for the shardline core library.
///
/// Variants follow the operational taxonomy: validation failures are
/// returned to the caller and carry a field-qualified message, schema and
/// configuration errors are fatal, and everything else is an opaque I/O or
/// decode failure that propagates unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ShardlineError {
    #[error("Validation error on entity '{entity}': {message}")]
    Validation { entity: String, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ShardlineError {
    /// Shorthand for a validation failure on `entity`.
    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// True for failures the outer layer should surface verbatim to the user.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True for errors that indicate a broken deployment rather than a bad
    /// request or a flaky connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Schema(_) | Self::Config(_))
    }
}

pub type ShardlineResult<T> = Result<T, ShardlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_entity() {
        let err = ShardlineError::validation("post", "unknown field path 'titel'");
        assert!(err.is_validation());
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Validation error on entity 'post': unknown field path 'titel'"
        );
    }

    #[test]
    fn config_errors_are_fatal() {
        assert!(ShardlineError::Config("no shard for key 7".into()).is_fatal());
        assert!(ShardlineError::Schema("missing key".into()).is_fatal());
        assert!(!ShardlineError::Database("locked".into()).is_fatal());
    }
}
