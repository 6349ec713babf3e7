//! End-to-end migration tests against two real clusters
//!
//! These tests need two reachable clusters (two kind clusters work) and
//! only compile with the `e2e` feature:
//!
//! ```bash
//! export MIGRATE_E2E_SOURCE_KUBECONFIG=~/.kube/kind-source
//! export MIGRATE_E2E_DEST_KUBECONFIG=~/.kube/kind-dest
//! cargo test --features e2e --test kind -- --nocapture
//! ```

mod kind_tests;
