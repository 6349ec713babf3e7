//! Importer engine
//!
//! Replays an export archive into a destination cluster. Resources are
//! created in priority order so dependencies exist before their dependents.
//! A failure for one object becomes an event in the [`ReplayOutcome`]; only
//! an unreadable archive or one from a different export fails the replay.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use kube::discovery::verbs;
use migrator_plugin::{ReplayItemAction, ResourceIdentifier};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::archive::{ArchivedItem, ExportArchive};
use crate::client::ResourceClient;
use crate::discovery::{DiscoveredResource, DiscoverySnapshot};
use crate::error::EngineError;
use crate::outcome::{ReplayOutcome, Scope};

/// Resources replayed first, in this order; everything else follows
/// alphabetically.
pub const DEFAULT_REPLAY_PRIORITIES: &[&str] = &[
    "customresourcedefinitions",
    "namespaces",
    "storageclasses",
    "volumesnapshotclass.snapshot.storage.k8s.io",
    "volumesnapshotcontents.snapshot.storage.k8s.io",
    "volumesnapshots.snapshot.storage.k8s.io",
    "persistentvolumes",
    "persistentvolumeclaims",
    "secrets",
    "configmaps",
    "serviceaccounts",
    "limitranges",
    "pods",
    "replicasets.apps",
    "clusters.cluster.x-k8s.io",
    "clusterresourcesets.addons.cluster.x-k8s.io",
];

/// Resources never replayed
pub const NON_REPLAYABLE_RESOURCES: &[&str] = &["nodes", "events", "events.events.k8s.io"];

/// Resources skipped unless volumes are restored
const VOLUME_RESOURCES: &[&str] = &["persistentvolumes"];

/// Default ceiling for one replay run
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(240 * 60);

const CUSTOM_RESOURCE_DEFINITIONS: &str = "customresourcedefinitions.apiextensions.k8s.io";
const NAMESPACES: &str = "namespaces";

/// Metadata fields kept when an object is recreated
const PRESERVED_METADATA: &[&str] = &["name", "namespace", "labels", "annotations"];

/// Importer tuning
#[derive(Clone, Debug)]
pub struct ImporterConfig {
    /// Resource replay order
    pub priorities: Vec<String>,
    /// Ceiling for a whole replay run
    pub resource_timeout: Duration,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            priorities: DEFAULT_REPLAY_PRIORITIES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
        }
    }
}

/// Parameters of one replay run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayRequest {
    name: String,
    export_name: String,
    excluded_resources: Vec<String>,
    restore_volumes: bool,
}

impl ReplayRequest {
    /// Replay of `export_name` excluding non-replayable resources and volumes
    pub fn new(name: impl Into<String>, export_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            export_name: export_name.into(),
            excluded_resources: NON_REPLAYABLE_RESOURCES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            restore_volumes: false,
        }
    }

    /// Replay name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export the archive must hold
    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    /// Resources left out
    pub fn excluded_resources(&self) -> &[String] {
        &self.excluded_resources
    }

    /// Whether persistent volumes are recreated
    pub fn restore_volumes(&self) -> bool {
        self.restore_volumes
    }
}

/// Order the resources present in an archive for replay.
///
/// Priorities are matched through the destination snapshot, so
/// `volumesnapshotclass.snapshot.storage.k8s.io` finds the archived
/// `volumesnapshotclasses.snapshot.storage.k8s.io`.
///
/// The order holds for the archive walk only. Additional items named by a
/// replay action are created right before the object that named them, so a
/// configmap action pulling in a pod creates that pod ahead of the
/// remaining configmaps.
pub fn order_resources<'a>(
    snapshot: &DiscoverySnapshot,
    priorities: &[String],
    present: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut remaining: Vec<&str> = present.into_iter().collect();
    remaining.sort_unstable();
    remaining.dedup();

    let mut ordered = Vec::with_capacity(remaining.len());
    for priority in priorities {
        let canonical = snapshot
            .resolve(priority)
            .map(DiscoveredResource::qualified_name)
            .unwrap_or_else(|| priority.clone());
        if let Some(pos) = remaining
            .iter()
            .position(|r| *r == canonical || *r == priority.as_str())
        {
            ordered.push(remaining.remove(pos).to_string());
        }
    }
    ordered.extend(remaining.into_iter().map(str::to_string));
    ordered
}

/// Keep only the identifying metadata and drop status
fn reset_metadata(mut object: Value) -> Value {
    if let Some(obj) = object.as_object_mut() {
        obj.remove("status");
        if let Some(Value::Object(meta)) = obj.get_mut("metadata") {
            meta.retain(|k, _| PRESERVED_METADATA.contains(&k.as_str()));
        }
    }
    object
}

/// Replays export archives into one cluster
pub struct Importer {
    client: Arc<dyn ResourceClient>,
    config: ImporterConfig,
}

impl Importer {
    /// Importer with default configuration
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self::with_config(client, ImporterConfig::default())
    }

    /// Importer with explicit configuration
    pub fn with_config(client: Arc<dyn ResourceClient>, config: ImporterConfig) -> Self {
        Self { client, config }
    }

    /// Replay the archive read from `source`.
    ///
    /// Fails only when the archive is unreadable or belongs to another
    /// export. Exceeding the configured timeout stops the run and records a
    /// plugin-scope error.
    pub async fn replay<R: Read + Send>(
        &self,
        request: &ReplayRequest,
        snapshot: DiscoverySnapshot,
        actions: &[Arc<dyn ReplayItemAction>],
        source: R,
    ) -> Result<ReplayOutcome, EngineError> {
        let archive = ExportArchive::read(source)?;
        let found = &archive.descriptor().name;
        if found != request.export_name() {
            return Err(EngineError::DescriptorMismatch {
                expected: request.export_name().to_string(),
                found: found.clone(),
            });
        }

        info!(
            replay = %request.name(),
            export = %request.export_name(),
            items = archive.len(),
            "Starting replay"
        );

        let mut excluded = snapshot.resolve_all(request.excluded_resources());
        if !request.restore_volumes() {
            excluded.extend(snapshot.resolve_all(VOLUME_RESOURCES));
        }

        let mut outcome = ReplayOutcome::new();
        let mut run = ReplayRun {
            client: self.client.as_ref(),
            actions,
            archive: &archive,
            export_name: request.export_name(),
            snapshot,
            excluded,
            replayed: HashSet::new(),
            namespaces: HashSet::new(),
            outcome: &mut outcome,
        };

        let order = order_resources(&run.snapshot, &self.config.priorities, archive.resources());
        let finished = timeout(self.config.resource_timeout, run.replay_all(order)).await;
        drop(run);
        if finished.is_err() {
            warn!(replay = %request.name(), "Replay timed out");
            outcome.error(
                Scope::Plugin,
                None,
                format!("replay timed out after {:?}", self.config.resource_timeout),
            );
        }

        info!(
            replay = %request.name(),
            restored = outcome.restored(),
            warnings = outcome.warnings().len(),
            errors = outcome.errors().len(),
            "Replay finished"
        );
        Ok(outcome)
    }
}

struct ReplayRun<'a> {
    client: &'a dyn ResourceClient,
    actions: &'a [Arc<dyn ReplayItemAction>],
    archive: &'a ExportArchive,
    export_name: &'a str,
    snapshot: DiscoverySnapshot,
    excluded: HashSet<String>,
    replayed: HashSet<ResourceIdentifier>,
    namespaces: HashSet<String>,
    outcome: &'a mut ReplayOutcome,
}

impl ReplayRun<'_> {
    async fn replay_all(&mut self, order: Vec<String>) {
        for resource_name in order {
            if self.excluded.contains(&resource_name) {
                debug!(resource = %resource_name, "Skipping excluded resource");
                continue;
            }

            let archive = self.archive;
            let items = archive.items(&resource_name);
            let Some(resource) = self.snapshot.resolve(&resource_name).cloned() else {
                for item in items {
                    self.outcome.error(
                        Scope::Cluster,
                        Some(item.identifier()),
                        "resource type not found on destination",
                    );
                }
                continue;
            };
            if self.excluded.contains(&resource.qualified_name()) {
                debug!(resource = %resource_name, "Skipping excluded resource");
                continue;
            }
            if !resource.supports(verbs::CREATE) {
                debug!(resource = %resource_name, count = items.len(), "Skipping resource the destination cannot create");
                continue;
            }

            let before = self.outcome.restored();
            for item in items {
                self.replay_item(&resource, item).await;
            }
            debug!(resource = %resource_name, count = items.len(), "Replayed resource");

            if resource.qualified_name() == CUSTOM_RESOURCE_DEFINITIONS
                && self.outcome.restored() > before
            {
                self.refresh_discovery().await;
            }
        }
    }

    /// Pick up the types served by newly created CRDs
    async fn refresh_discovery(&mut self) {
        match self.client.discover().await {
            Ok(snapshot) => {
                debug!(resources = snapshot.resources().len(), "Refreshed discovery after CRDs");
                self.snapshot = snapshot;
            }
            Err(e) => {
                self.outcome.warn(
                    Scope::Cluster,
                    None,
                    format!("discovery refresh after CRDs failed: {}", e),
                );
            }
        }
    }

    async fn replay_item(&mut self, resource: &DiscoveredResource, item: &ArchivedItem) {
        let id = item.identifier();
        if self.replayed.contains(&id) {
            return;
        }

        let mut object = item.object.clone();
        let mut additional = Vec::new();
        for action in self.actions {
            if !action
                .applies_to()
                .matches(&item.resource, item.namespace.as_deref())
            {
                continue;
            }
            match action.execute(&item.resource, object, self.export_name).await {
                Ok(output) if output.skip => {
                    debug!(action = %action.name(), resource = %item.resource, name = %item.name, "Action skipped item");
                    self.replayed.insert(id);
                    return;
                }
                Ok(output) => {
                    object = output.item;
                    additional.extend(output.additional_items);
                }
                Err(e) => {
                    self.replayed.insert(id.clone());
                    self.outcome.error(Scope::Plugin, Some(id), e.to_string());
                    return;
                }
            }
        }

        // Related objects go in first and are not run through actions
        for related in additional {
            self.replay_related(&id, related).await;
        }

        self.create(resource, id, object).await;
    }

    async fn replay_related(&mut self, parent: &ResourceIdentifier, related: ResourceIdentifier) {
        if self.replayed.contains(&related) {
            return;
        }
        let scope = Scope::for_namespace(related.namespace.as_deref());

        let archive = self.archive;
        let Some(item) = archive.find(&related) else {
            self.outcome.warn(
                scope,
                Some(related),
                format!("additional item of {} not found in export", parent.name),
            );
            return;
        };
        let Some(resource) = self.snapshot.resolve(&item.resource).cloned() else {
            self.replayed.insert(related.clone());
            self.outcome.error(
                Scope::Cluster,
                Some(related),
                "resource type not found on destination",
            );
            return;
        };
        if self.excluded.contains(&resource.qualified_name()) || self.excluded.contains(&item.resource) {
            debug!(resource = %item.resource, name = %item.name, "Skipping excluded additional item");
            return;
        }
        if !resource.supports(verbs::CREATE) {
            debug!(resource = %item.resource, name = %item.name, "Skipping additional item the destination cannot create");
            return;
        }

        self.create(&resource, related, item.object.clone()).await;
    }

    async fn ensure_namespace(&mut self, namespace: &str) {
        if !self.namespaces.insert(namespace.to_string()) {
            return;
        }
        let Some(resource) = self.snapshot.resolve(NAMESPACES).cloned() else {
            return;
        };

        match self.client.get(&resource, None, namespace).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Could not check namespace");
            }
        }

        let object = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        });
        match self.client.create(&resource, None, &object).await {
            Ok(_) => info!(namespace = %namespace, "Created namespace"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => self.outcome.error(
                Scope::Namespace(namespace.to_string()),
                None,
                format!("could not create namespace: {}", e),
            ),
        }
    }

    async fn create(&mut self, resource: &DiscoveredResource, id: ResourceIdentifier, object: Value) {
        if !self.replayed.insert(id.clone()) {
            return;
        }
        let namespace = id.namespace.as_deref().filter(|_| resource.namespaced);
        if let Some(ns) = namespace {
            self.ensure_namespace(ns).await;
        }
        let scope = Scope::for_namespace(namespace);
        let object = reset_metadata(object);

        let err = match self.client.create(resource, namespace, &object).await {
            Ok(_) => {
                self.outcome.restored_one();
                return;
            }
            Err(e) => e,
        };

        if !err.is_already_exists() {
            self.outcome
                .error(scope, Some(id), format!("could not restore: {}", err));
            return;
        }

        // An existing namespace is the expected case after ensure_namespace
        if resource.qualified_name() == NAMESPACES {
            return;
        }

        match self.client.get(resource, namespace, &id.name).await {
            Ok(Some(existing)) if reset_metadata(existing.clone()) == object => {
                debug!(resource = %id.resource, name = %id.name, "Identical object already exists");
            }
            Ok(_) => self.outcome.error(
                scope,
                Some(id),
                "already exists on destination with different contents",
            ),
            Err(e) => self.outcome.error(
                scope,
                Some(id),
                format!("already exists on destination and could not be compared: {}", e),
            ),
        }
    }
}
