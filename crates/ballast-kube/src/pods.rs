//! Merge-patch pod annotation writes for PreBind.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};
use tracing::debug;

use ballast_plugins::topology::PatchError;
use ballast_plugins::PodPatcher;

#[derive(Clone)]
pub struct KubePodPatcher {
    client: Client,
}

impl KubePodPatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodPatcher for KubePodPatcher {
    async fn patch_pod_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PatchError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut annotations = serde_json::Map::new();
        annotations.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
        let patch = serde_json::json!({
            "metadata": { "annotations": serde_json::Value::Object(annotations) }
        });

        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| PatchError::Api(err.to_string()))?;

        debug!(namespace, pod = name, key, "patched pod annotation");
        Ok(())
    }
}
