//! Common types for migrator: errors, cluster clients and the credential bridge

#![deny(missing_docs)]

pub mod client;
pub mod credentials;
pub mod error;

pub use client::{ClientFactory, ClusterClients, ClusterEndpoint, ClusterRole, KubeconfigClientFactory};
pub use credentials::publish_credential;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the shared kubeconfig path read by plugin processes
pub const PLUGINS_KUBECONFIG_ENV: &str = "PLUGINS_KUBECONFIG";

/// Environment variable set on every launched plugin process with the
/// kubeconfig of the cluster the current phase acts on
pub const PLUGIN_KUBECONFIG_ENV: &str = "MIGRATOR_PLUGIN_KUBECONFIG";
