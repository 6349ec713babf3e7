//! Exporter engine
//!
//! Reads every selected object from the source cluster, runs the matching
//! export actions on it and writes the result into an archive. Any failure
//! aborts the export; there is no partial archive.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::discovery::verbs;
use migrator_plugin::{ExportItemAction, ResourceIdentifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::client::ResourceClient;
use crate::discovery::{DiscoveredResource, DiscoverySnapshot};
use crate::error::EngineError;

/// Resources never exported; volume data is not migrated
pub const DEFAULT_EXCLUDED_EXPORT_RESOURCES: &[&str] =
    &["persistentvolumeclaims", "persistentvolumes"];

/// Objects every cluster creates in every namespace by itself
const CLUSTER_GENERATED_OBJECTS: &[(&str, &str)] = &[
    ("serviceaccounts", "default"),
    ("configmaps", "kube-root-ca.crt"),
];

const NAMESPACES: &str = "namespaces";

/// Verbs a resource must serve for its objects to be exported
const EXPORT_VERBS: &[&str] = &[verbs::LIST, verbs::GET, verbs::CREATE];

/// Identifies one export run and the parameters it used
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDescriptor {
    /// Unique export name
    pub name: String,
    /// Namespaces the export was scoped to
    pub included_namespaces: Vec<String>,
    /// Resources left out of the export
    pub excluded_resources: Vec<String>,
    /// Whether volume snapshots were taken
    pub snapshot_volumes: bool,
    /// When the export started
    pub created_at: DateTime<Utc>,
}

/// Parameters of one export run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    name: String,
    included_namespaces: Vec<String>,
    excluded_resources: Vec<String>,
    snapshot_volumes: bool,
}

impl ExportRequest {
    /// Export of `namespaces` excluding volume resources, without snapshots
    pub fn new(name: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            name: name.into(),
            included_namespaces: namespaces,
            excluded_resources: DEFAULT_EXCLUDED_EXPORT_RESOURCES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            snapshot_volumes: false,
        }
    }

    /// Export name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespaces to export
    pub fn included_namespaces(&self) -> &[String] {
        &self.included_namespaces
    }

    /// Resources left out
    pub fn excluded_resources(&self) -> &[String] {
        &self.excluded_resources
    }

    /// Descriptor recording this request
    pub fn descriptor(&self, created_at: DateTime<Utc>) -> ExportDescriptor {
        ExportDescriptor {
            name: self.name.clone(),
            included_namespaces: self.included_namespaces.clone(),
            excluded_resources: self.excluded_resources.clone(),
            snapshot_volumes: self.snapshot_volumes,
            created_at,
        }
    }
}

/// One list call the exporter makes
#[derive(Clone, Debug)]
pub struct ExportTarget {
    /// Resource to list
    pub resource: DiscoveredResource,
    /// Namespace to list in
    pub namespace: String,
}

/// Plan the list calls for a request.
///
/// Every namespaced resource that is not excluded and can be listed, read
/// back and recreated is listed in each included namespace. Read-only
/// aggregated resources such as `pods.metrics.k8s.io` are left out.
/// Cluster-scoped resources are only exported when named explicitly (the
/// included namespace objects, additional items).
pub fn plan_export(snapshot: &DiscoverySnapshot, request: &ExportRequest) -> Vec<ExportTarget> {
    let excluded = snapshot.resolve_all(request.excluded_resources());

    let mut targets = Vec::new();
    for resource in snapshot.resources() {
        if !resource.namespaced
            || !EXPORT_VERBS.iter().all(|verb| resource.supports(verb))
            || excluded.contains(&resource.qualified_name())
        {
            continue;
        }
        for ns in request.included_namespaces() {
            targets.push(ExportTarget {
                resource: resource.clone(),
                namespace: ns.clone(),
            });
        }
    }
    targets
}

/// Result of a completed export
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    /// Descriptor written into the archive
    pub descriptor: ExportDescriptor,
    /// Objects written, per qualified resource
    pub items: BTreeMap<String, usize>,
}

impl ExportSummary {
    /// Total objects written
    pub fn total(&self) -> usize {
        self.items.values().sum()
    }
}

/// Exports objects from one cluster into an archive
pub struct Exporter {
    client: Arc<dyn ResourceClient>,
}

impl Exporter {
    /// Exporter reading through `client`
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Run one export into `sink`.
    ///
    /// The sink holds a complete archive only when this returns `Ok`.
    pub async fn export<W: Write + Send>(
        &self,
        request: &ExportRequest,
        snapshot: &DiscoverySnapshot,
        actions: &[Arc<dyn ExportItemAction>],
        sink: W,
    ) -> Result<ExportSummary, EngineError> {
        let descriptor = request.descriptor(Utc::now());
        info!(
            export = %descriptor.name,
            namespaces = ?descriptor.included_namespaces,
            excluded = ?descriptor.excluded_resources,
            "Starting export"
        );

        let mut run = ExportRun {
            client: self.client.as_ref(),
            actions,
            included: request.included_namespaces().iter().cloned().collect(),
            excluded: snapshot.resolve_all(request.excluded_resources()),
            writer: ArchiveWriter::new(sink, &descriptor)?,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            items: BTreeMap::new(),
        };

        if let Some(namespaces) = snapshot.resolve(NAMESPACES) {
            for ns in request.included_namespaces() {
                let found = self
                    .client
                    .get(namespaces, None, ns)
                    .await
                    .map_err(|e| EngineError::export(NAMESPACES, e.to_string()))?;
                match found {
                    Some(obj) => run.export_item(namespaces, obj).await?,
                    None => warn!(namespace = %ns, "Included namespace not found on source"),
                }
            }
        }

        for target in plan_export(snapshot, request) {
            let resource = target.resource.qualified_name();
            let objects = self
                .client
                .list(&target.resource, Some(&target.namespace))
                .await
                .map_err(|e| EngineError::export(&resource, e.to_string()))?;
            if !objects.is_empty() {
                debug!(resource = %resource, namespace = %target.namespace, count = objects.len(), "Listed objects");
            }
            for obj in objects {
                run.export_item(&target.resource, obj).await?;
            }
        }

        run.export_additional_items(snapshot).await?;

        let ExportRun { writer, items, .. } = run;
        writer.finish()?;

        let summary = ExportSummary { descriptor, items };
        info!(
            export = %summary.descriptor.name,
            items = summary.total(),
            "Export complete"
        );
        Ok(summary)
    }
}

struct ExportRun<'a, W: Write> {
    client: &'a dyn ResourceClient,
    actions: &'a [Arc<dyn ExportItemAction>],
    included: HashSet<String>,
    excluded: HashSet<String>,
    writer: ArchiveWriter<W>,
    seen: HashSet<ResourceIdentifier>,
    pending: VecDeque<ResourceIdentifier>,
    items: BTreeMap<String, usize>,
}

impl<W: Write + Send> ExportRun<'_, W> {
    async fn export_item(
        &mut self,
        resource: &DiscoveredResource,
        mut item: Value,
    ) -> Result<(), EngineError> {
        let qualified = resource.qualified_name();
        let name = item
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::export(&qualified, "object has no name"))?
            .to_string();
        let namespace = if resource.namespaced {
            item.pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        if CLUSTER_GENERATED_OBJECTS.contains(&(qualified.as_str(), name.as_str())) {
            return Ok(());
        }

        let id = ResourceIdentifier {
            resource: qualified.clone(),
            namespace: namespace.clone(),
            name: name.clone(),
        };
        if !self.seen.insert(id) {
            return Ok(());
        }

        for action in self.actions {
            if !action.applies_to().matches(&qualified, namespace.as_deref()) {
                continue;
            }
            let output = action.execute(&qualified, item).await?;
            item = output.item;
            self.pending.extend(output.additional_items);
        }

        self.writer
            .add(&qualified, namespace.as_deref(), &name, &item)?;
        *self.items.entry(qualified).or_default() += 1;
        Ok(())
    }

    /// Fetch the objects actions asked for, following their own additional
    /// items until none are left.
    async fn export_additional_items(
        &mut self,
        snapshot: &DiscoverySnapshot,
    ) -> Result<(), EngineError> {
        while let Some(id) = self.pending.pop_front() {
            if self.seen.contains(&id) {
                continue;
            }
            let Some(resource) = snapshot.resolve(&id.resource) else {
                warn!(resource = %id.resource, name = %id.name, "Additional item has unknown resource type");
                continue;
            };
            let qualified = resource.qualified_name();
            if self.excluded.contains(&qualified) || self.excluded.contains(&id.resource) {
                debug!(resource = %qualified, name = %id.name, "Additional item excluded");
                continue;
            }
            if let Some(ns) = &id.namespace {
                if !self.included.contains(ns) {
                    debug!(resource = %qualified, namespace = %ns, name = %id.name, "Additional item outside included namespaces");
                    continue;
                }
            }

            let namespace = id.namespace.as_deref().filter(|_| resource.namespaced);
            let found = self
                .client
                .get(resource, namespace, &id.name)
                .await
                .map_err(|e| EngineError::export(&qualified, e.to_string()))?;
            match found {
                Some(obj) => self.export_item(resource, obj).await?,
                None => warn!(resource = %qualified, name = %id.name, "Additional item not found"),
            }
        }
        Ok(())
    }
}
