//! Reflector-backed node store with JSON-Patch annotation writes.

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Patch, PatchParams},
    runtime::{reflector, watcher, WatchStreamExt},
    Api, Client,
};
use kube::runtime::reflector::{ObjectRef, Store};
use tracing::{info, warn};

use ballast_annotator::cluster::{ClusterError, NodeStore, PatchOp};

pub struct KubeNodeStore {
    api: Api<Node>,
    store: Store<Node>,
}

impl KubeNodeStore {
    /// Start a node reflector and wait for its first full list.
    pub async fn new(client: Client) -> anyhow::Result<Self> {
        let api: Api<Node> = Api::all(client);
        let (reader, writer) = reflector::store();

        let stream = reflector(writer, watcher(api.clone(), watcher::Config::default()))
            .default_backoff()
            .touched_objects()
            .for_each(|res| {
                if let Err(err) = res {
                    warn!(error = %err, "node reflector error");
                }
                futures::future::ready(())
            });
        tokio::spawn(stream);

        reader.wait_until_ready().await?;
        info!("node cache synced");
        Ok(Self { api, store: reader })
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn list_node_names(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .store
            .state()
            .iter()
            .filter_map(|node| node.metadata.name.clone())
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        Ok(self
            .store
            .get(&ObjectRef::new(name))
            .map(|node| (*node).clone()))
    }

    async fn patch_node_annotation(
        &self,
        name: &str,
        op: PatchOp,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([{
            "op": op.as_str(),
            "path": format!("/metadata/annotations/{}", escape_pointer_token(key)),
            "value": value,
        }]))
        .map_err(|err| ClusterError::Api(err.to_string()))?;

        self.api
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|err| match &err {
                kube::Error::Api(response) if [404, 410, 422].contains(&response.code) => {
                    ClusterError::Permanent(err.to_string())
                }
                _ => ClusterError::Api(err.to_string()),
            })?;
        Ok(())
    }
}

/// RFC 6901 escaping for an annotation key used as a pointer token.
fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_escaping() {
        assert_eq!(escape_pointer_token("node_hot_value"), "node_hot_value");
        assert_eq!(escape_pointer_token("a/b"), "a~1b");
        assert_eq!(escape_pointer_token("a~b"), "a~0b");
    }
}
