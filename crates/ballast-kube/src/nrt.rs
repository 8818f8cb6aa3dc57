//! Reflector-backed NodeResourceTopology lister.

use futures::StreamExt;
use kube::{
    runtime::{reflector, watcher, WatchStreamExt},
    Api, Client,
};
use kube::runtime::reflector::{ObjectRef, Store};
use tracing::{info, warn};

use ballast_core::topology::NodeResourceTopology;
use ballast_plugins::NrtLister;

pub struct KubeNrtLister {
    store: Store<NodeResourceTopology>,
}

impl KubeNrtLister {
    /// Start an NRT reflector and wait for its first full list.
    pub async fn new(client: Client) -> anyhow::Result<Self> {
        let api: Api<NodeResourceTopology> = Api::all(client);
        let (reader, writer) = reflector::store();

        let stream = reflector(writer, watcher(api, watcher::Config::default()))
            .default_backoff()
            .touched_objects()
            .for_each(|res| {
                if let Err(err) = res {
                    warn!(error = %err, "node resource topology reflector error");
                }
                futures::future::ready(())
            });
        tokio::spawn(stream);

        reader.wait_until_ready().await?;
        info!("node resource topology cache synced");
        Ok(Self { store: reader })
    }
}

impl NrtLister for KubeNrtLister {
    fn get(&self, node_name: &str) -> Option<NodeResourceTopology> {
        self.store
            .get(&ObjectRef::new(node_name))
            .map(|nrt| (*nrt).clone())
    }
}
