//! Replay actions compiled into the binary
//!
//! These undo cluster-assigned fields that would make the destination API
//! server reject an object or pin it to something that only existed on the
//! source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::action::{ReplayActionOutput, ReplayItemAction, ResourceSelector};
use crate::error::PluginError;

/// Prefix of the projected service account token volumes the kubelet injects
const SERVICE_ACCOUNT_TOKEN_VOLUME_PREFIX: &str = "kube-api-access-";

/// All built-in replay actions
pub fn builtin_replay_actions() -> Vec<Arc<dyn ReplayItemAction>> {
    vec![
        Arc::new(PodReplayAction::default()),
        Arc::new(ServiceReplayAction::default()),
    ]
}

/// Strips node binding and injected token volumes from pods
#[derive(Debug)]
pub struct PodReplayAction {
    selector: ResourceSelector,
}

impl Default for PodReplayAction {
    fn default() -> Self {
        Self {
            selector: ResourceSelector::for_resources(&["pods"]),
        }
    }
}

#[async_trait]
impl ReplayItemAction for PodReplayAction {
    fn name(&self) -> &str {
        "builtin/pod"
    }

    fn applies_to(&self) -> &ResourceSelector {
        &self.selector
    }

    async fn execute(
        &self,
        _resource: &str,
        mut item: Value,
        _export_name: &str,
    ) -> Result<ReplayActionOutput, PluginError> {
        let spec = item
            .get_mut("spec")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| PluginError::action(self.name(), "pod has no spec"))?;

        spec.remove("nodeName");

        // Admission assigns priority from the class on the destination
        if spec.contains_key("priorityClassName") {
            spec.remove("priority");
        }

        let mut dropped = Vec::new();
        if let Some(volumes) = spec.get_mut("volumes").and_then(Value::as_array_mut) {
            volumes.retain(|v| match volume_name(v) {
                Some(name) if name.starts_with(SERVICE_ACCOUNT_TOKEN_VOLUME_PREFIX) => {
                    dropped.push(name.to_string());
                    false
                }
                _ => true,
            });
        }

        if !dropped.is_empty() {
            for key in ["containers", "initContainers"] {
                if let Some(containers) = spec.get_mut(key).and_then(Value::as_array_mut) {
                    for container in containers {
                        if let Some(mounts) = container
                            .get_mut("volumeMounts")
                            .and_then(Value::as_array_mut)
                        {
                            mounts.retain(|m| {
                                !matches!(volume_name(m), Some(n) if dropped.iter().any(|d| d == n))
                            });
                        }
                    }
                }
            }
            debug!(volumes = ?dropped, "Dropped service account token volumes");
        }

        Ok(ReplayActionOutput::unchanged(item))
    }
}

fn volume_name(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

/// Clears allocated IPs and node ports from services
#[derive(Debug)]
pub struct ServiceReplayAction {
    selector: ResourceSelector,
}

impl Default for ServiceReplayAction {
    fn default() -> Self {
        Self {
            selector: ResourceSelector::for_resources(&["services"]),
        }
    }
}

#[async_trait]
impl ReplayItemAction for ServiceReplayAction {
    fn name(&self) -> &str {
        "builtin/service"
    }

    fn applies_to(&self) -> &ResourceSelector {
        &self.selector
    }

    async fn execute(
        &self,
        _resource: &str,
        mut item: Value,
        _export_name: &str,
    ) -> Result<ReplayActionOutput, PluginError> {
        let Some(spec) = item.get_mut("spec").and_then(Value::as_object_mut) else {
            return Ok(ReplayActionOutput::unchanged(item));
        };

        let headless = spec.get("clusterIP").and_then(Value::as_str) == Some("None");
        if !headless {
            spec.remove("clusterIP");
            spec.remove("clusterIPs");
        }

        spec.remove("healthCheckNodePort");
        if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut().filter_map(Value::as_object_mut) {
                port.remove("nodePort");
            }
        }

        Ok(ReplayActionOutput::unchanged(item))
    }
}
