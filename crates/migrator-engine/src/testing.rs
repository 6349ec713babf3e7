//! In-memory cluster for engine tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use migrator_plugin::ResourceIdentifier;
use serde_json::Value;

use crate::client::ResourceClient;
use crate::discovery::{DiscoveredResource, DiscoverySnapshot};
use crate::error::EngineError;

type Key = (String, Option<String>, String);

/// Stores objects by qualified resource, namespace and name and records
/// every successful create in order.
pub(crate) struct FakeCluster {
    resources: Vec<DiscoveredResource>,
    objects: Mutex<BTreeMap<Key, Value>>,
    created: Mutex<Vec<ResourceIdentifier>>,
    failing_lists: Mutex<HashSet<String>>,
    rejections: Mutex<HashMap<String, (u16, String)>>,
    create_delay: Option<Duration>,
}

impl FakeCluster {
    pub(crate) fn new(resources: Vec<DiscoveredResource>) -> Self {
        Self {
            resources,
            objects: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
            failing_lists: Mutex::new(HashSet::new()),
            rejections: Mutex::new(HashMap::new()),
            create_delay: None,
        }
    }

    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub(crate) fn insert(&self, resource: &str, namespace: Option<&str>, object: Value) {
        let name = object["metadata"]["name"].as_str().unwrap().to_string();
        self.objects.lock().unwrap().insert(
            (resource.to_string(), namespace.map(str::to_string), name),
            object,
        );
    }

    pub(crate) fn fail_list(&self, resource: &str) {
        self.failing_lists
            .lock()
            .unwrap()
            .insert(resource.to_string());
    }

    pub(crate) fn reject_creates(&self, resource: &str, code: u16, reason: &str) {
        self.rejections
            .lock()
            .unwrap()
            .insert(resource.to_string(), (code, reason.to_string()));
    }

    pub(crate) fn created(&self) -> Vec<ResourceIdentifier> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn object(&self, resource: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(
                resource.to_string(),
                namespace.map(str::to_string),
                name.to_string(),
            ))
            .cloned()
    }
}

fn key(resource: &DiscoveredResource, namespace: Option<&str>, name: &str) -> Key {
    (
        resource.qualified_name(),
        namespace.filter(|_| resource.namespaced).map(str::to_string),
        name.to_string(),
    )
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn discover(&self) -> Result<DiscoverySnapshot, EngineError> {
        Ok(DiscoverySnapshot::new(self.resources.clone()))
    }

    async fn list(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, EngineError> {
        let qualified = resource.qualified_name();
        if self.failing_lists.lock().unwrap().contains(&qualified) {
            return Err(EngineError::api(403, "Forbidden", format!("cannot list {}", qualified)));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, ns, _), _)| {
                *r == qualified && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, EngineError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key(resource, namespace, name))
            .cloned())
    }

    async fn create(
        &self,
        resource: &DiscoveredResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value, EngineError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let qualified = resource.qualified_name();
        if let Some((code, reason)) = self.rejections.lock().unwrap().get(&qualified) {
            return Err(EngineError::api(*code, reason.clone(), "rejected"));
        }

        let name = object["metadata"]["name"].as_str().unwrap_or_default();
        let key = key(resource, namespace, name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(EngineError::api(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", resource.api_resource.plural, name),
            ));
        }
        objects.insert(key.clone(), object.clone());
        self.created.lock().unwrap().push(ResourceIdentifier {
            resource: key.0,
            namespace: key.1,
            name: key.2,
        });
        Ok(object.clone())
    }
}
