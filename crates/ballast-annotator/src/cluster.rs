//! The slice of the cluster API the annotator consumes.
//!
//! Kept behind a trait so the controller can run against the kube-backed
//! implementation in production and an in-memory one in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Transient failure; the caller retries with backoff.
    #[error("cluster api error: {0}")]
    Api(String),
    /// Permanent failure (gone or invalid); the caller drops the key.
    #[error("cluster api rejected request: {0}")]
    Permanent(String),
}

/// JSON-Patch operation for an annotation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
        }
    }
}

/// Node listing and annotation patching.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn list_node_names(&self) -> Result<Vec<String>, ClusterError>;

    /// `Ok(None)` means the node no longer exists; the caller drops the
    /// sync key.
    async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError>;

    async fn patch_node_annotation(
        &self,
        name: &str,
        op: PatchOp,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError>;
}

/// A node's InternalIP address, if it advertises one.
pub fn node_internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|addr| addr.type_ == "InternalIP")
        .map(|addr| addr.address.as_str())
}
