//! Discovery snapshot of a cluster's API resources
//!
//! Resources are addressed by qualified name: the plural for the core group
//! (`pods`) and `plural.group` otherwise (`replicasets.apps`).

use std::collections::HashSet;

use kube::discovery::{verbs, ApiResource, Discovery, Scope};
use kube::Client;
use tracing::debug;

use crate::error::EngineError;

/// One API resource type served by a cluster
#[derive(Clone, Debug)]
pub struct DiscoveredResource {
    /// Group, version, kind and plural of the resource
    pub api_resource: ApiResource,
    /// Whether objects live in a namespace
    pub namespaced: bool,
    /// Verbs the API server supports for the resource
    pub verbs: Vec<String>,
}

impl DiscoveredResource {
    /// A resource supporting list, get and create
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", group, version)
        };
        Self {
            api_resource: ApiResource {
                group: group.to_string(),
                version: version.to_string(),
                api_version,
                kind: kind.to_string(),
                plural: plural.to_string(),
            },
            namespaced,
            verbs: [verbs::LIST, verbs::GET, verbs::CREATE]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    /// Replace the supported verbs
    pub fn with_verbs(mut self, supported: &[&str]) -> Self {
        self.verbs = supported.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Qualified name, e.g. `pods` or `replicasets.apps`
    pub fn qualified_name(&self) -> String {
        let ar = &self.api_resource;
        if ar.group.is_empty() {
            ar.plural.clone()
        } else {
            format!("{}.{}", ar.plural, ar.group)
        }
    }

    /// Whether the API server supports `verb` for this resource
    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }

    fn answers_to(&self, name: &str) -> bool {
        self.api_resource.plural == name || self.api_resource.kind.to_lowercase() == name
    }
}

/// API resources served by one cluster at one point in time
#[derive(Clone, Debug, Default)]
pub struct DiscoverySnapshot {
    resources: Vec<DiscoveredResource>,
}

impl DiscoverySnapshot {
    /// Snapshot from a known resource list
    pub fn new(mut resources: Vec<DiscoveredResource>) -> Self {
        resources.sort_by_key(|r| r.qualified_name());
        Self { resources }
    }

    /// Run API discovery against a cluster.
    ///
    /// For each kind the highest-stability version is taken, so a group
    /// serving `v1` and `v1beta1` resolves to `v1`.
    pub async fn from_cluster(client: &Client) -> Result<Self, EngineError> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(|e| EngineError::Discovery(format!("API discovery failed: {}", e)))?;

        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.resources_by_stability() {
                resources.push(DiscoveredResource {
                    api_resource: ar,
                    namespaced: caps.scope == Scope::Namespaced,
                    verbs: caps.operations.clone(),
                });
            }
        }

        debug!(resources = resources.len(), "Discovered API resources");
        Ok(Self::new(resources))
    }

    /// All resources, sorted by qualified name
    pub fn resources(&self) -> &[DiscoveredResource] {
        &self.resources
    }

    /// Resolve a user-facing resource name.
    ///
    /// Accepts qualified names, `plural.group` / `kind.group` and bare plurals
    /// or lowercase kinds. A bare name prefers the core group, so `events`
    /// resolves to core events rather than `events.events.k8s.io`.
    pub fn resolve(&self, name: &str) -> Option<&DiscoveredResource> {
        let name = name.to_lowercase();
        if let Some(exact) = self.resources.iter().find(|r| r.qualified_name() == name) {
            return Some(exact);
        }

        match name.split_once('.') {
            Some((resource, group)) => self
                .resources
                .iter()
                .find(|r| r.api_resource.group == group && r.answers_to(resource)),
            None => {
                let mut candidates = self.resources.iter().filter(|r| r.answers_to(&name));
                let first = candidates.next()?;
                if first.api_resource.group.is_empty() {
                    return Some(first);
                }
                candidates
                    .find(|r| r.api_resource.group.is_empty())
                    .or(Some(first))
            }
        }
    }

    /// Resolve a list of names into a lookup set holding each name as given
    /// and the qualified name it resolves to.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> HashSet<String> {
        let mut set = HashSet::new();
        for name in names {
            let name = name.as_ref();
            set.insert(name.to_string());
            if let Some(resource) = self.resolve(name) {
                set.insert(resource.qualified_name());
            }
        }
        set
    }
}

#[cfg(test)]
pub(crate) fn standard_resources() -> Vec<DiscoveredResource> {
    vec![
        DiscoveredResource::new("", "v1", "Namespace", "namespaces", false),
        DiscoveredResource::new("", "v1", "Node", "nodes", false),
        DiscoveredResource::new("", "v1", "PersistentVolume", "persistentvolumes", false),
        DiscoveredResource::new("", "v1", "Pod", "pods", true),
        DiscoveredResource::new("", "v1", "ConfigMap", "configmaps", true),
        DiscoveredResource::new("", "v1", "Secret", "secrets", true),
        DiscoveredResource::new("", "v1", "Service", "services", true),
        DiscoveredResource::new("", "v1", "ServiceAccount", "serviceaccounts", true),
        DiscoveredResource::new("", "v1", "Event", "events", true),
        DiscoveredResource::new(
            "",
            "v1",
            "PersistentVolumeClaim",
            "persistentvolumeclaims",
            true,
        ),
        DiscoveredResource::new("events.k8s.io", "v1", "Event", "events", true),
        DiscoveredResource::new("apps", "v1", "ReplicaSet", "replicasets", true),
        DiscoveredResource::new("apps", "v1", "Deployment", "deployments", true),
        DiscoveredResource::new(
            "apiextensions.k8s.io",
            "v1",
            "CustomResourceDefinition",
            "customresourcedefinitions",
            false,
        ),
        DiscoveredResource::new(
            "snapshot.storage.k8s.io",
            "v1",
            "VolumeSnapshotClass",
            "volumesnapshotclasses",
            false,
        ),
        DiscoveredResource::new("", "v1", "Binding", "bindings", true)
            .with_verbs(&[verbs::CREATE]),
    ]
}
