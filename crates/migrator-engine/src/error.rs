//! Engine error types

use migrator_plugin::PluginError;
use thiserror::Error;

/// Errors from discovery, the archive and the engines
#[derive(Debug, Error)]
pub enum EngineError {
    /// API server rejected a request
    #[error("API error {code} ({reason}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Machine-readable reason (e.g. "AlreadyExists")
        reason: String,
        /// Human-readable message
        message: String,
    },

    /// Transport or client error talking to the API server
    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// API discovery failed or a resource could not be resolved
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Archive stream is malformed or of an unsupported version
    #[error("archive error: {0}")]
    Archive(String),

    /// Archive belongs to a different export than the one being replayed
    #[error("export descriptor mismatch: expected {expected}, found {found}")]
    DescriptorMismatch {
        /// Export name the replay was asked for
        expected: String,
        /// Export name recorded in the archive
        found: String,
    },

    /// Exporting a resource failed
    #[error("failed to export {resource}: {message}")]
    Export {
        /// Qualified resource name
        resource: String,
        /// Error message
        message: String,
    },

    /// IO error on the archive stream
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Item action failed
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl EngineError {
    /// Create an API error
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Create an archive error
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    /// Create an export error for a resource
    pub fn export(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Export {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Whether the API server reported the object as already existing
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Api { code: 409, .. })
            || matches!(self, Self::Api { reason, .. } if reason == "AlreadyExists")
    }

    /// Whether the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { code: 404, .. })
    }
}

impl From<kube::Error> for EngineError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => Self::Api {
                code: ae.code,
                reason: ae.reason,
                message: ae.message,
            },
            other => Self::Kube(other),
        }
    }
}
