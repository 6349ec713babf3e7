//! Export and replay item action traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;

/// Wildcard accepted in selector lists
const WILDCARD: &str = "*";

/// Identifies one object by qualified resource name, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    /// Qualified resource name (e.g. "persistentvolumes", "replicasets.apps")
    pub resource: String,
    /// Namespace, absent for cluster-scoped objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceIdentifier {
    /// Identifier for a namespaced object
    pub fn namespaced(
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Identifier for a cluster-scoped object
    pub fn cluster(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            namespace: None,
            name: name.into(),
        }
    }
}

/// Objects an action applies to
///
/// Empty include lists match everything. Cluster-scoped objects only match
/// selectors without namespace restrictions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    /// Resources the action handles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,
    /// Resources the action never handles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,
    /// Namespaces the action handles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,
    /// Namespaces the action never handles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,
}

impl ResourceSelector {
    /// Selector matching the given resources in every namespace
    pub fn for_resources(resources: &[&str]) -> Self {
        Self {
            included_resources: resources.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Check whether an object of `resource` in `namespace` is selected
    pub fn matches(&self, resource: &str, namespace: Option<&str>) -> bool {
        let included = self.included_resources.is_empty()
            || self
                .included_resources
                .iter()
                .any(|r| r == WILDCARD || resource_matches(r, resource));
        let excluded = self
            .excluded_resources
            .iter()
            .any(|r| resource_matches(r, resource));
        if !included || excluded {
            return false;
        }

        match namespace {
            Some(ns) => {
                (self.included_namespaces.is_empty()
                    || self
                        .included_namespaces
                        .iter()
                        .any(|n| n == WILDCARD || n == ns))
                    && !self.excluded_namespaces.iter().any(|n| n == ns)
            }
            None => self.included_namespaces.is_empty() && self.excluded_namespaces.is_empty(),
        }
    }
}

/// Check whether a selector entry names a qualified resource.
///
/// Qualified names carry their group, so `"replicasets.apps"` matches only
/// the apps group and an unqualified `"pods"` names the core resource. It
/// does not match `pods.metrics.k8s.io`.
pub fn resource_matches(entry: &str, qualified: &str) -> bool {
    entry == qualified
}

/// Result of an export action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportActionOutput {
    /// The (possibly modified) object to store
    pub item: Value,
    /// Related objects to export alongside this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_items: Vec<ResourceIdentifier>,
}

impl ExportActionOutput {
    /// Output returning the item unchanged
    pub fn unchanged(item: Value) -> Self {
        Self {
            item,
            additional_items: Vec::new(),
        }
    }
}

/// Result of a replay action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayActionOutput {
    /// The (possibly modified) object to create
    pub item: Value,
    /// Related objects from the archive to replay before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_items: Vec<ResourceIdentifier>,
    /// Skip replaying this object
    #[serde(default)]
    pub skip: bool,
}

impl ReplayActionOutput {
    /// Output returning the item unchanged
    pub fn unchanged(item: Value) -> Self {
        Self {
            item,
            additional_items: Vec::new(),
            skip: false,
        }
    }

    /// Output asking for the item to be skipped
    pub fn skipped(item: Value) -> Self {
        Self {
            skip: true,
            ..Self::unchanged(item)
        }
    }
}

/// Action run on each exported object it applies to
#[async_trait]
pub trait ExportItemAction: Send + Sync {
    /// Action name, unique across plugins
    fn name(&self) -> &str;

    /// Objects the action applies to
    fn applies_to(&self) -> &ResourceSelector;

    /// Transform one object read from the source cluster
    async fn execute(&self, resource: &str, item: Value)
        -> Result<ExportActionOutput, PluginError>;
}

/// Action run on each replayed object it applies to
#[async_trait]
pub trait ReplayItemAction: Send + Sync {
    /// Action name, unique across plugins
    fn name(&self) -> &str;

    /// Objects the action applies to
    fn applies_to(&self) -> &ResourceSelector;

    /// Transform one object before it is created on the destination
    async fn execute(
        &self,
        resource: &str,
        item: Value,
        export_name: &str,
    ) -> Result<ReplayActionOutput, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_matches() {
        assert!(resource_matches("pods", "pods"));
        assert!(!resource_matches("replicasets", "replicasets.apps"));
        assert!(!resource_matches("pods", "pods.metrics.k8s.io"));
        assert!(resource_matches("replicasets.apps", "replicasets.apps"));
        assert!(!resource_matches("replicasets.extensions", "replicasets.apps"));
        assert!(!resource_matches("events.events.k8s.io", "events"));
        assert!(!resource_matches("pod", "pods"));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = ResourceSelector::default();
        assert!(selector.matches("pods", Some("webapp")));
        assert!(selector.matches("namespaces", None));
    }

    #[test]
    fn selector_filters_resources() {
        let selector = ResourceSelector::for_resources(&["pods", "services"]);
        assert!(selector.matches("pods", Some("webapp")));
        assert!(selector.matches("services", Some("other")));
        assert!(!selector.matches("configmaps", Some("webapp")));
        assert!(!selector.matches("pods.metrics.k8s.io", Some("webapp")));
    }

    #[test]
    fn selector_excludes_win_over_includes() {
        let selector = ResourceSelector {
            included_resources: vec!["*".to_string()],
            excluded_resources: vec!["secrets".to_string()],
            ..Default::default()
        };
        assert!(selector.matches("configmaps", Some("webapp")));
        assert!(!selector.matches("secrets", Some("webapp")));
    }

    #[test]
    fn selector_namespace_restrictions() {
        let selector = ResourceSelector {
            included_namespaces: vec!["webapp".to_string()],
            ..Default::default()
        };
        assert!(selector.matches("pods", Some("webapp")));
        assert!(!selector.matches("pods", Some("kube-system")));
        // Cluster-scoped objects never match a namespace-restricted selector
        assert!(!selector.matches("namespaces", None));

        let selector = ResourceSelector {
            excluded_namespaces: vec!["kube-system".to_string()],
            ..Default::default()
        };
        assert!(selector.matches("pods", Some("webapp")));
        assert!(!selector.matches("pods", Some("kube-system")));
    }

    #[test]
    fn replay_output_serializes_camel_case() {
        let output = ReplayActionOutput {
            item: serde_json::json!({"kind": "Pod"}),
            additional_items: vec![ResourceIdentifier::namespaced(
                "configmaps",
                "webapp",
                "settings",
            )],
            skip: false,
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["additionalItems"][0]["resource"], "configmaps");
        assert_eq!(value["additionalItems"][0]["namespace"], "webapp");
        assert_eq!(value["skip"], false);
    }
}
