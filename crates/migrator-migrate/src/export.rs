//! Export phase driver
//!
//! Connects to the source cluster, starts the plugins against it and runs
//! the exporter once into the transfer medium.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use migrator_common::{ClientFactory, ClusterEndpoint};
use migrator_engine::{ExportDescriptor, ExportRequest, Exporter, KubeResourceClient, ResourceClient};
use migrator_plugin::{PluginManager, PluginRegistry};
#[cfg(test)]
use mockall::automock;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::MigrateError;

/// Runs one export of a source cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExportPhase: Send + Sync {
    /// Export `namespaces` from the cluster at `endpoint` into `sink`.
    ///
    /// The sink holds a complete archive only when this returns `Ok`.
    async fn run_export(
        &self,
        endpoint: &ClusterEndpoint,
        plugin_dir: &Path,
        namespaces: &[String],
        sink: &mut File,
    ) -> Result<ExportDescriptor, MigrateError>;
}

/// Export phase backed by the exporter engine and the plugin manager
pub struct ExportDriver {
    factory: Arc<dyn ClientFactory>,
}

impl ExportDriver {
    /// Driver opening clients through `factory`
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ExportPhase for ExportDriver {
    async fn run_export(
        &self,
        endpoint: &ClusterEndpoint,
        plugin_dir: &Path,
        namespaces: &[String],
        sink: &mut File,
    ) -> Result<ExportDescriptor, MigrateError> {
        let clients = self.factory.open(endpoint).await?;

        let mut plugins = PluginManager::new(PluginRegistry::new(plugin_dir), endpoint.kubeconfig());
        plugins.start().await?;

        let result = async {
            let client: Arc<dyn ResourceClient> = Arc::new(KubeResourceClient::new(clients.client.clone()));
            let snapshot = client
                .discover()
                .await
                .map_err(|e| MigrateError::connection(endpoint.role().as_str(), e.to_string()))?;

            let request = ExportRequest::new(export_name(), namespaces.to_vec());
            let actions = plugins.export_actions();
            info!(
                export = %request.name(),
                namespaces = ?request.included_namespaces(),
                resources = snapshot.resources().len(),
                actions = actions.len(),
                "Exporting source cluster"
            );

            let summary = Exporter::new(client)
                .export(&request, &snapshot, &actions, &mut *sink)
                .await
                .map_err(|e| MigrateError::ExportEngine(e.to_string()))?;
            Ok(summary.descriptor)
        }
        .await;

        plugins.release_all().await;
        if let Err(e) = &result {
            error!(error = %e, "Export failed");
        }
        result
    }
}

/// Unique export name, e.g. `migrate-20240101120000-3f2a9c1d`
fn export_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("migrate-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &id[..8])
}
