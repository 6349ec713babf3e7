//! Error types for migration runs

use std::fmt;

use migrator_plugin::PluginError;
use thiserror::Error;

/// Fatal errors that abort a migration run
///
/// Per-object replay failures are not errors; they are recorded in the
/// replay outcome.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Kubeconfig could not be loaded or a cluster is unreachable
    #[error("connection error [{cluster}]: {message}")]
    Connection {
        /// Role of the cluster ("source" or "destination")
        cluster: String,
        /// Error message
        message: String,
    },

    /// Plugins could not be discovered or started
    #[error("plugin discovery failed: {0}")]
    PluginDiscovery(String),

    /// Local filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        /// Operation that failed
        context: String,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// The exporter failed; no usable archive was written
    #[error("export failed: {0}")]
    ExportEngine(String),

    /// The importer could not start replaying the archive
    #[error("replay could not start: {0}")]
    ReplayStart(String),
}

impl MigrateError {
    /// Create a connection error for the given cluster
    pub fn connection(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Create an io error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<migrator_common::Error> for MigrateError {
    fn from(err: migrator_common::Error) -> Self {
        match err {
            migrator_common::Error::Connection { cluster, message } => {
                Self::Connection { cluster, message }
            }
            migrator_common::Error::Io { context, source } => Self::Io { context, source },
        }
    }
}

impl From<PluginError> for MigrateError {
    fn from(err: PluginError) -> Self {
        Self::PluginDiscovery(err.to_string())
    }
}

/// Step of a migration run an abort is attributed to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationStep {
    /// Creating the transfer medium
    AllocateMedium,
    /// Copying the source kubeconfig to the shared credential file
    PublishSourceCredential,
    /// Exporting from the source cluster
    Export,
    /// Copying the destination kubeconfig to the shared credential file
    PublishDestinationCredential,
    /// Seeking the transfer medium back to its start
    RewindMedium,
    /// Replaying into the destination cluster
    Replay,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStep::AllocateMedium => "allocate transfer medium",
            MigrationStep::PublishSourceCredential => "publish source credential",
            MigrationStep::Export => "export",
            MigrationStep::PublishDestinationCredential => "publish destination credential",
            MigrationStep::RewindMedium => "rewind transfer medium",
            MigrationStep::Replay => "replay",
        })
    }
}
