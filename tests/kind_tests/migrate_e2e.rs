//! Real end-to-end migration between two clusters
//!
//! # Prerequisites
//!
//! - Two clusters reachable through the kubeconfigs in
//!   `MIGRATE_E2E_SOURCE_KUBECONFIG` and `MIGRATE_E2E_DEST_KUBECONFIG`
//! - Both clusters able to schedule a busybox pod
//!
//! # Running
//!
//! ```bash
//! cargo test --features e2e --test kind migrate_e2e -- --nocapture
//! ```

// Only compile this module when the e2e feature is enabled
#![cfg(feature = "e2e")]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Container, Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::time::sleep;

use migrator_common::ClusterEndpoint;
use migrator_engine::Completion;
use migrator_migrate::{MigrationRequest, MigrationResult, MigrationState, Migrator};

// =============================================================================
// Test Configuration
// =============================================================================

const SOURCE_KUBECONFIG_ENV: &str = "MIGRATE_E2E_SOURCE_KUBECONFIG";
const DEST_KUBECONFIG_ENV: &str = "MIGRATE_E2E_DEST_KUBECONFIG";

/// Time a deleted namespace has to disappear
const NAMESPACE_GONE_TIMEOUT: Duration = Duration::from_secs(180);

// =============================================================================
// Helper Functions
// =============================================================================

fn kubeconfig(env: &str) -> PathBuf {
    std::env::var(env)
        .map(PathBuf::from)
        .unwrap_or_else(|_| panic!("{env} must point at a kubeconfig"))
}

async fn client_for(path: &PathBuf) -> Client {
    let kubeconfig = Kubeconfig::read_from(path).expect("readable kubeconfig");
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .expect("valid kubeconfig");
    Client::try_from(config).expect("client")
}

/// Delete a namespace if present and wait until it is gone
async fn reset_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;

    let deadline = tokio::time::Instant::now() + NAMESPACE_GONE_TIMEOUT;
    while namespaces.get_opt(name).await.expect("get namespace").is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "namespace {name} not deleted in time"
        );
        sleep(Duration::from_secs(2)).await;
    }
}

async fn create_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces
        .create(&PostParams::default(), &ns)
        .await
        .expect("create namespace");
}

fn settings(namespace: &str, mode: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("settings".to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("mode".to_string(), mode.to_string())])),
        ..Default::default()
    }
}

fn web_pod(namespace: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                image: Some("busybox:1.36".to_string()),
                command: Some(vec!["sleep".to_string(), "3600".to_string()]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Seed `namespace` on the source with one configmap and one pod
async fn seed_source(client: &Client, namespace: &str) {
    reset_namespace(client, namespace).await;
    create_namespace(client, namespace).await;

    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    configmaps
        .create(&PostParams::default(), &settings(namespace, "production"))
        .await
        .expect("create configmap");

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    pods.create(&PostParams::default(), &web_pod(namespace))
        .await
        .expect("create pod");
}

fn request(namespace: &str, scratch: &tempfile::TempDir) -> MigrationRequest {
    let plugin_dir = scratch.path().join("plugins");
    let cache_dir = scratch.path().join("cache");
    std::fs::create_dir_all(&plugin_dir).expect("plugin dir");
    std::fs::create_dir_all(&cache_dir).expect("cache dir");

    MigrationRequest {
        source: ClusterEndpoint::source(kubeconfig(SOURCE_KUBECONFIG_ENV)),
        destination: ClusterEndpoint::destination(kubeconfig(DEST_KUBECONFIG_ENV)),
        namespaces: vec![namespace.to_string()],
        plugin_dir,
        cache_dir,
        shared_credential: scratch.path().join("shared/kubeconfig"),
    }
}

// =============================================================================
// Tests
// =============================================================================

/// A namespace with a configmap and a pod lands on an empty destination
#[tokio::test]
async fn story_webapp_moves_to_empty_destination() {
    let source = client_for(&kubeconfig(SOURCE_KUBECONFIG_ENV)).await;
    let dest = client_for(&kubeconfig(DEST_KUBECONFIG_ENV)).await;

    seed_source(&source, "webapp").await;
    reset_namespace(&dest, "webapp").await;

    let scratch = tempfile::tempdir().expect("scratch dir");
    let request = request("webapp", &scratch);
    let report = Migrator::new().run(&request).await;

    assert_eq!(report.final_state(), MigrationState::Done);
    match report.result {
        MigrationResult::Completed { outcome, .. } => {
            assert!(!outcome.has_errors(), "unexpected errors:\n{}", outcome.errors());
        }
        MigrationResult::Aborted { step, error } => panic!("aborted at {step}: {error}"),
    }

    let configmaps: Api<ConfigMap> = Api::namespaced(dest.clone(), "webapp");
    let migrated = configmaps.get("settings").await.expect("configmap migrated");
    assert_eq!(
        migrated.data.unwrap_or_default().get("mode").map(String::as_str),
        Some("production")
    );

    let pods: Api<Pod> = Api::namespaced(dest.clone(), "webapp");
    let pod = pods.get("web").await.expect("pod migrated");
    assert_eq!(
        pod.metadata.labels.unwrap_or_default().get("app").map(String::as_str),
        Some("web")
    );

    // Medium removed
    assert_eq!(std::fs::read_dir(&request.cache_dir).unwrap().count(), 0);
}

/// A conflicting object on the destination is reported, the run still completes
#[tokio::test]
async fn story_conflicting_object_is_reported() {
    let source = client_for(&kubeconfig(SOURCE_KUBECONFIG_ENV)).await;
    let dest = client_for(&kubeconfig(DEST_KUBECONFIG_ENV)).await;

    seed_source(&source, "conflict").await;
    reset_namespace(&dest, "conflict").await;
    create_namespace(&dest, "conflict").await;
    let configmaps: Api<ConfigMap> = Api::namespaced(dest.clone(), "conflict");
    configmaps
        .create(&PostParams::default(), &settings("conflict", "staging"))
        .await
        .expect("create conflicting configmap");

    let scratch = tempfile::tempdir().expect("scratch dir");
    let report = Migrator::new().run(&request("conflict", &scratch)).await;

    assert_eq!(report.final_state(), MigrationState::Done);
    match report.result {
        MigrationResult::Completed {
            completion,
            outcome,
        } => {
            assert_eq!(completion, Completion::CompletedWithErrors);
            let errors = outcome.errors();
            let messages = errors.namespaces.get("conflict").cloned().unwrap_or_default();
            assert!(
                messages.iter().any(|m| m.contains("configmaps conflict/settings")),
                "conflict not reported:\n{errors}"
            );
        }
        MigrationResult::Aborted { step, error } => panic!("aborted at {step}: {error}"),
    }

    // Destination keeps its own copy
    let kept = configmaps.get("settings").await.expect("configmap");
    assert_eq!(
        kept.data.unwrap_or_default().get("mode").map(String::as_str),
        Some("staging")
    );
}
