//! Error types for the CLI

use migrator_migrate::{MigrateError, MigrationStep};

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("migration aborted during {step}: {source}")]
    Migration {
        step: MigrationStep,
        #[source]
        source: MigrateError,
    },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
