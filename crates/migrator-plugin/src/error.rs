//! Error types for plugin handling

use thiserror::Error;

/// Errors from plugin discovery, launch and action execution
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin directory could not be scanned
    #[error("plugin discovery failed in {dir}: {message}")]
    Discovery {
        /// Directory being scanned
        dir: String,
        /// Error message
        message: String,
    },

    /// Plugin process could not be started or described itself incorrectly
    #[error("failed to launch plugin {plugin}: {message}")]
    Launch {
        /// Plugin binary name
        plugin: String,
        /// Error message
        message: String,
    },

    /// Plugin broke the request/response protocol
    #[error("plugin {plugin} protocol error: {message}")]
    Protocol {
        /// Plugin binary name
        plugin: String,
        /// Error message
        message: String,
    },

    /// Action reported a failure for an item
    #[error("action {action} failed: {message}")]
    Action {
        /// Action name
        action: String,
        /// Error message
        message: String,
    },

    /// IO error talking to a plugin
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    /// Create an action failure
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::action("example/strip", "bad item");
        assert_eq!(err.to_string(), "action example/strip failed: bad item");

        let err = PluginError::Discovery {
            dir: "/plugins".to_string(),
            message: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "plugin discovery failed in /plugins: not found"
        );
    }
}
