//! Cluster client factory
//!
//! Every component obtains its Kubernetes clients through [`ClientFactory`],
//! so kubeconfig handling lives in one place and tests can substitute it.
//! A single kube `Client` serves the typed core API, the dynamic API and
//! any versioned custom API group; the resolved `Config` is kept alongside
//! it as the REST config.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Side of the migration a cluster plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterRole {
    /// Cluster resources are exported from
    Source,
    /// Cluster resources are replayed into
    Destination,
}

impl ClusterRole {
    /// Lowercase name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterRole::Source => "source",
            ClusterRole::Destination => "destination",
        }
    }

    /// Logical client identity used for clients opened against this role
    pub fn client_identity(&self) -> &'static str {
        match self {
            ClusterRole::Source => "source-cluster",
            ClusterRole::Destination => "dest-cluster",
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kubeconfig reference tagged with the role its cluster plays
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEndpoint {
    kubeconfig: PathBuf,
    role: ClusterRole,
}

impl ClusterEndpoint {
    /// Create an endpoint for the given kubeconfig and role
    pub fn new(kubeconfig: impl Into<PathBuf>, role: ClusterRole) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            role,
        }
    }

    /// Endpoint for the source cluster
    pub fn source(kubeconfig: impl Into<PathBuf>) -> Self {
        Self::new(kubeconfig, ClusterRole::Source)
    }

    /// Endpoint for the destination cluster
    pub fn destination(kubeconfig: impl Into<PathBuf>) -> Self {
        Self::new(kubeconfig, ClusterRole::Destination)
    }

    /// Path of the kubeconfig file
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Role of the cluster
    pub fn role(&self) -> ClusterRole {
        self.role
    }
}

/// Clients opened against one cluster
#[derive(Clone)]
pub struct ClusterClients {
    /// Client for typed, dynamic and custom API access
    pub client: Client,
    /// Resolved REST configuration the client was built from
    pub config: Config,
    /// Logical client identity (e.g. "source-cluster")
    pub identity: String,
    /// Role of the cluster
    pub role: ClusterRole,
}

impl fmt::Debug for ClusterClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClients")
            .field("identity", &self.identity)
            .field("role", &self.role)
            .field("cluster_url", &self.config.cluster_url)
            .finish()
    }
}

/// Opens clients for a cluster endpoint
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build clients for `endpoint`
    ///
    /// Fails with [`Error::Connection`] when the kubeconfig cannot be loaded
    /// or the API server does not answer.
    async fn open(&self, endpoint: &ClusterEndpoint) -> Result<ClusterClients, Error>;
}

/// Client factory reading kubeconfig files from disk
#[derive(Clone, Debug)]
pub struct KubeconfigClientFactory {
    /// Connection timeout applied to every client
    pub connect_timeout: Duration,
    /// Read timeout applied to every client
    pub read_timeout: Duration,
}

impl Default for KubeconfigClientFactory {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl KubeconfigClientFactory {
    /// Load the REST config for an endpoint without contacting the cluster
    pub async fn load_config(&self, endpoint: &ClusterEndpoint) -> Result<Config, Error> {
        let role = endpoint.role();
        let kubeconfig = Kubeconfig::read_from(endpoint.kubeconfig()).map_err(|e| {
            Error::connection(
                role.as_str(),
                format!(
                    "failed to read kubeconfig {}: {}",
                    endpoint.kubeconfig().display(),
                    e
                ),
            )
        })?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::connection(role.as_str(), format!("failed to load kubeconfig: {}", e))
            })?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        debug!(
            cluster = %role,
            server = %config.cluster_url,
            "Loaded kubeconfig"
        );
        Ok(config)
    }
}

#[async_trait]
impl ClientFactory for KubeconfigClientFactory {
    async fn open(&self, endpoint: &ClusterEndpoint) -> Result<ClusterClients, Error> {
        let role = endpoint.role();
        let config = self.load_config(endpoint).await?;

        let client = Client::try_from(config.clone()).map_err(|e| {
            Error::connection(role.as_str(), format!("failed to create client: {}", e))
        })?;

        let version = client.apiserver_version().await.map_err(|e| {
            Error::connection(
                role.as_str(),
                format!("API server {} unreachable: {}", config.cluster_url, e),
            )
        })?;

        info!(
            cluster = %role,
            server = %config.cluster_url,
            version = %version.git_version,
            "Connected to cluster"
        );

        Ok(ClusterClients {
            client,
            config,
            identity: role.client_identity().to_string(),
            role,
        })
    }
}
