//! API access used by the engines

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::core::TypeMeta;
use kube::Client;
use serde_json::Value;

use crate::discovery::{DiscoveredResource, DiscoverySnapshot};
use crate::error::EngineError;

/// Page size for list requests
const LIST_PAGE_SIZE: u32 = 500;

/// Untyped access to any resource of one cluster
///
/// Objects are plain JSON so engines and item actions can rewrite them
/// without knowing their schema.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Discover the resources the cluster serves
    async fn discover(&self) -> Result<DiscoverySnapshot, EngineError>;

    /// List objects of a resource, in one namespace or cluster-wide
    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, EngineError>;

    /// Get one object, `None` when it does not exist
    async fn get(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, EngineError>;

    /// Create an object and return it as stored
    async fn create(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, EngineError>;
}

/// [`ResourceClient`] backed by a kube client
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &DiscoveredResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if resource.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &resource.api_resource)
            }
            _ => Api::all_with(self.client.clone(), &resource.api_resource),
        }
    }
}

/// List responses omit apiVersion and kind on items; restore them so the
/// stored object is self-describing.
fn with_type_meta(mut obj: DynamicObject, resource: &DiscoveredResource) -> DynamicObject {
    obj.types = Some(TypeMeta {
        api_version: resource.api_resource.api_version.clone(),
        kind: resource.api_resource.kind.clone(),
    });
    obj
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn discover(&self) -> Result<DiscoverySnapshot, EngineError> {
        DiscoverySnapshot::from_cluster(&self.client).await
    }

    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, EngineError> {
        let api = self.api(resource, namespace);
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
        let mut items = Vec::new();

        loop {
            let page = api.list(&params).await?;
            for obj in page.items {
                items.push(serde_json::to_value(with_type_meta(obj, resource))?);
            }
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => params = params.continue_token(&token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn get(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, EngineError> {
        let api = self.api(resource, namespace);
        match api.get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(with_type_meta(obj, resource))?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, EngineError> {
        let api = self.api(resource, namespace);
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        let created = api.create(&PostParams::default(), &obj).await?;
        Ok(serde_json::to_value(created)?)
    }
}
