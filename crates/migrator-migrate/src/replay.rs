//! Replay phase driver
//!
//! Connects to the destination cluster, starts the plugins against it and
//! runs the importer once over the rewound transfer medium.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use migrator_common::{ClientFactory, ClusterEndpoint};
use migrator_engine::{
    ExportDescriptor, Importer, ImporterConfig, KubeResourceClient, ReplayOutcome, ReplayRequest,
    ResourceClient,
};
use migrator_plugin::{PluginManager, PluginRegistry};
#[cfg(test)]
use mockall::automock;
use tracing::{error, info};

use crate::error::MigrateError;

/// Runs one replay into a destination cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplayPhase: Send + Sync {
    /// Replay the archive in `source` produced by the export `descriptor`.
    ///
    /// Per-object failures are recorded in the returned outcome; only
    /// failures to start the replay are errors.
    async fn run_replay(
        &self,
        endpoint: &ClusterEndpoint,
        plugin_dir: &Path,
        source: &mut File,
        descriptor: &ExportDescriptor,
    ) -> Result<ReplayOutcome, MigrateError>;
}

/// Replay phase backed by the importer engine and the plugin manager
pub struct ReplayDriver {
    factory: Arc<dyn ClientFactory>,
    config: ImporterConfig,
}

impl ReplayDriver {
    /// Driver opening clients through `factory` with the default importer settings
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_config(factory, ImporterConfig::default())
    }

    /// Driver with explicit importer settings
    pub fn with_config(factory: Arc<dyn ClientFactory>, config: ImporterConfig) -> Self {
        Self { factory, config }
    }
}

#[async_trait]
impl ReplayPhase for ReplayDriver {
    async fn run_replay(
        &self,
        endpoint: &ClusterEndpoint,
        plugin_dir: &Path,
        source: &mut File,
        descriptor: &ExportDescriptor,
    ) -> Result<ReplayOutcome, MigrateError> {
        let clients = self.factory.open(endpoint).await?;

        let mut plugins = PluginManager::new(PluginRegistry::new(plugin_dir), endpoint.kubeconfig());
        plugins.start().await?;

        let result = async {
            let client: Arc<dyn ResourceClient> = Arc::new(KubeResourceClient::new(clients.client.clone()));
            let snapshot = client
                .discover()
                .await
                .map_err(|e| MigrateError::connection(endpoint.role().as_str(), e.to_string()))?;

            let request = ReplayRequest::new(format!("{}-replay", descriptor.name), &descriptor.name);
            let actions = plugins.replay_actions();
            info!(
                replay = %request.name(),
                export = %request.export_name(),
                excluded = ?request.excluded_resources(),
                actions = actions.len(),
                "Replaying into destination cluster"
            );

            Importer::with_config(client, self.config.clone())
                .replay(&request, snapshot, &actions, &mut *source)
                .await
                .map_err(|e| MigrateError::ReplayStart(e.to_string()))
        }
        .await;

        plugins.release_all().await;
        if let Err(e) = &result {
            error!(error = %e, "Replay could not start");
        }
        result
    }
}
