//! Scheduled-event consumption: cluster events → binding records.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Event;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::records::{Binding, BindingRecords};

const MESSAGE_PREFIX: &str = "Successfully assigned ";
const MESSAGE_SEPARATOR: &str = " to ";

/// Bound on the resource-version dedup map; events churn, so the map is
/// reset rather than grown forever.
const SEEN_VERSIONS_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to extract binding from event message {0:?}")]
    MalformedMessage(String),
    #[error("event for {0} carries no usable timestamp")]
    MissingTimestamp(String),
}

/// Drains the filtered event feed into the binding heap.
pub struct EventWorker {
    records: Arc<BindingRecords>,
}

impl EventWorker {
    pub fn new(records: Arc<BindingRecords>) -> Self {
        Self { records }
    }

    pub async fn run(
        &self,
        mut events: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("event worker started");
        let mut seen_versions: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    match maybe {
                        Some(event) => self.handle(&mut seen_versions, event),
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("event worker stopped");
    }

    fn handle(&self, seen_versions: &mut HashMap<String, String>, event: Event) {
        if !is_scheduled_event(&event) {
            return;
        }

        let key = format!(
            "{}/{}",
            event.metadata.namespace.as_deref().unwrap_or_default(),
            event.metadata.name.as_deref().unwrap_or_default()
        );
        if let Some(version) = event.metadata.resource_version.as_ref() {
            if seen_versions.get(&key) == Some(version) {
                return;
            }
            if seen_versions.len() >= SEEN_VERSIONS_LIMIT {
                seen_versions.clear();
            }
            seen_versions.insert(key, version.clone());
        }

        match translate_event_to_binding(&event) {
            Ok(binding) => {
                debug!(
                    node = %binding.node,
                    pod = %binding.pod_name,
                    "recorded scheduling event"
                );
                self.records.add_binding(binding);
            }
            Err(err) => warn!(error = %err, "dropping unparseable scheduling event"),
        }
    }
}

/// Only normal `Scheduled` events describe fresh placements.
pub fn is_scheduled_event(event: &Event) -> bool {
    event.type_.as_deref() == Some("Normal") && event.reason.as_deref() == Some("Scheduled")
}

/// Parse `"Successfully assigned <ns>/<pod> to <node>"` plus the event's
/// occurrence time into a [`Binding`].
pub fn translate_event_to_binding(event: &Event) -> Result<Binding, EventError> {
    let message = event.message.as_deref().unwrap_or_default();
    let malformed = || EventError::MalformedMessage(message.to_string());

    let rest = message.strip_prefix(MESSAGE_PREFIX).ok_or_else(malformed)?;
    let (meta_key, node_part) = rest.split_once(MESSAGE_SEPARATOR).ok_or_else(malformed)?;
    let node = node_part.split_whitespace().next().ok_or_else(malformed)?;
    if meta_key.contains(char::is_whitespace) {
        return Err(malformed());
    }
    let (namespace, pod_name) = meta_key.split_once('/').ok_or_else(malformed)?;
    if namespace.is_empty() || pod_name.is_empty() {
        return Err(malformed());
    }

    // First occurrences carry eventTime; aggregated repeats move to
    // lastTimestamp.
    let timestamp = if event.count.unwrap_or(0) == 0 {
        event.event_time.as_ref().map(|t| t.0.timestamp())
    } else {
        event.last_timestamp.as_ref().map(|t| t.0.timestamp())
    };
    let timestamp = timestamp.ok_or_else(|| EventError::MissingTimestamp(meta_key.to_string()))?;

    Ok(Binding {
        timestamp,
        node: node.to_string(),
        namespace: namespace.to_string(),
        pod_name: pod_name.to_string(),
    })
}
