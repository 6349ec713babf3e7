//! Error types shared by the migrator crates
//!
//! Errors carry the cluster or the filesystem operation they relate to so
//! the orchestrator can report where a run stopped.

use thiserror::Error;

/// Errors from client construction and credential handling
#[derive(Debug, Error)]
pub enum Error {
    /// Kubeconfig could not be loaded or the API server is unreachable
    #[error("connection error [{cluster}]: {message}")]
    Connection {
        /// Role of the cluster ("source" or "destination")
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Local filesystem operation failed
    #[error("io error [{context}]: {source}")]
    Io {
        /// Operation that failed (e.g. "copy kubeconfig")
        context: String,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("source", "failed to read kubeconfig");
        assert_eq!(
            err.to_string(),
            "connection error [source]: failed to read kubeconfig"
        );

        let err = Error::io(
            "copy kubeconfig",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.to_string(), "io error [copy kubeconfig]: missing");
    }
}
