//! Test doubles shared by the driver and orchestrator tests

use async_trait::async_trait;
use migrator_common::{ClientFactory, ClusterClients, ClusterEndpoint, ClusterRole};
use mockall::mock;

mock! {
    pub Factory {}

    #[async_trait]
    impl ClientFactory for Factory {
        async fn open(&self, endpoint: &ClusterEndpoint) -> Result<ClusterClients, migrator_common::Error>;
    }
}

/// Clients pointing at a port nothing listens on
pub(crate) fn unreachable_clients(role: ClusterRole) -> ClusterClients {
    let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
    ClusterClients {
        client: kube::Client::try_from(config.clone()).unwrap(),
        config,
        identity: role.client_identity().to_string(),
        role,
    }
}
