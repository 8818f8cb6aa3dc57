//! Cluster event watch feeding the annotator's binding records.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ballast_annotator::event::is_scheduled_event;

/// Watch `Scheduled` events cluster-wide and forward them into a
/// bounded channel. The field selector narrows the watch server-side;
/// the client-side filter re-checks.
pub fn spawn_event_feed(
    client: Client,
    buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) -> (mpsc::Receiver<Event>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer);

    let handle = tokio::spawn(async move {
        let api: Api<Event> = Api::all(client);
        let config = watcher::Config::default().fields("reason=Scheduled,type=Normal");
        let mut stream = watcher(api, config)
            .default_backoff()
            .applied_objects()
            .boxed();

        info!("event feed started");
        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(event)) => {
                            if !is_scheduled_event(&event) {
                                continue;
                            }
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => warn!(error = %err, "event watch error"),
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("event feed stopped");
    });

    (rx, handle)
}
