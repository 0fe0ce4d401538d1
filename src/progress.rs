//! Per-request progress channel: structured events, fanned out by request id.
//!
//! The embedding service owns one [`ProgressRegistry`] and injects it into
//! the orchestrator; nothing in this crate touches ambient global state. A
//! push-stream client (SSE, WebSocket, …) subscribes under its
//! caller-generated request id — before processing starts, or never at all.
//! Events for an id with no registered listener are dropped silently: the
//! channel is pure fan-out with no backpressure, and a client that never
//! connects must not slow conversion down.
//!
//! # Why a registry instead of a callback trait?
//!
//! A per-request id → listener map is the natural shape when the client
//! connection has an independent lifecycle from the conversion: the listener
//! can appear late, disappear mid-task (disconnect), or be replaced. A
//! disconnect only deregisters the listener — in-flight processing continues
//! to completion and its result is still persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// A structured event pushed to the submitting client.
///
/// Serialises as a tagged JSON object (`"type": "log" | "thumbnail-init" |
/// "progress"`), ready to be written onto an event stream. Events are
/// ephemeral: nothing is persisted or replayed to late subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    /// Free-form status line.
    Log { message: String },

    /// Preview images for the task that just started, as data URIs.
    ///
    /// The reveal strategy sends a gray and a color rendition for an
    /// animated gray-to-color reveal; the static strategy (original mode)
    /// sends color only.
    ThumbnailInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        gray: Option<String>,
        color: String,
    },

    /// Fine-grained conversion progress.
    Progress {
        /// 1-based index of the task currently processing.
        task_index: usize,
        task_total: usize,
        /// Page counters where known; absent while the total is still
        /// undetermined (e.g. unknown document page count).
        #[serde(skip_serializing_if = "Option::is_none")]
        page_current: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_total: Option<usize>,
        /// 0–100.
        percent: u8,
        /// Human-readable phase description.
        status: String,
        /// File currently being worked on, where meaningful.
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
}

/// Percentage helper, clamped to 0–100 and safe for `total == 0`.
pub(crate) fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current * 100 / total).min(100)) as u8
}

/// Request-id → listener map, owned by the embedding service.
///
/// Mutation happens on channel open/close; the orchestrator only reads.
/// The interior mutex makes open/close safe under true parallelism; no lock
/// is held while events are delivered (senders are unbounded).
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    listeners: Mutex<HashMap<String, UnboundedSender<ProgressEvent>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UnboundedSender<ProgressEvent>>> {
        // A poisoned map only means another thread panicked mid-insert; the
        // map itself stays usable.
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a listener for `request_id`, replacing any previous one.
    ///
    /// Returns the receiving end of the event stream. A request id is
    /// assumed unique per conversion request and never reused concurrently.
    pub fn subscribe(&self, request_id: impl Into<String>) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = request_id.into();
        debug!("Progress listener registered for '{}'", id);
        self.lock().insert(id, tx);
        rx
    }

    /// Remove the listener for `request_id` (client disconnect).
    pub fn unsubscribe(&self, request_id: &str) {
        debug!("Progress listener removed for '{}'", request_id);
        self.lock().remove(request_id);
    }

    /// Number of currently registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver an event to the listener for `request_id`, if any.
    ///
    /// No listener, or a listener whose receiving end has been dropped,
    /// means the event is discarded without error; a dead sender is pruned
    /// from the map on the spot.
    pub fn emit(&self, request_id: &str, event: ProgressEvent) {
        let mut map = self.lock();
        if let Some(tx) = map.get(request_id) {
            if tx.send(event).is_err() {
                map.remove(request_id);
            }
        }
    }

    /// Bind a cheap per-request handle for the orchestrator.
    pub fn sink(self: &Arc<Self>, request_id: impl Into<String>) -> ProgressSink {
        ProgressSink {
            registry: Arc::clone(self),
            request_id: request_id.into(),
        }
    }
}

/// A per-request emit handle: the registry plus the bound request id.
///
/// Cloneable and `Send`, so the polling estimator can carry one into its
/// sampling task.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    registry: Arc<ProgressRegistry>,
    request_id: String,
}

impl ProgressSink {
    /// Emit a structured event for this request.
    pub fn emit(&self, event: ProgressEvent) {
        self.registry.emit(&self.request_id, event);
    }

    /// Emit a `log` event.
    pub fn log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Log {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ProgressRegistry> {
        Arc::new(ProgressRegistry::new())
    }

    #[tokio::test]
    async fn subscribed_listener_receives_events() {
        let reg = registry();
        let mut rx = reg.subscribe("req-1");

        reg.sink("req-1").log("hello");

        match rx.recv().await {
            Some(ProgressEvent::Log { message }) => assert_eq!(message, "hello"),
            other => panic!("expected log event, got {other:?}"),
        }
    }

    #[test]
    fn emit_without_listener_is_silent() {
        let reg = registry();
        // Must not panic or error.
        reg.sink("nobody").log("dropped");
        assert!(reg.is_empty());
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let reg = registry();
        let rx = reg.subscribe("req-2");
        drop(rx);

        reg.sink("req-2").log("into the void");
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let reg = registry();
        let _rx = reg.subscribe("req-3");
        assert_eq!(reg.len(), 1);
        reg.unsubscribe("req-3");
        assert_eq!(reg.len(), 0);
    }

    #[tokio::test]
    async fn resubscribe_replaces_listener() {
        let reg = registry();
        let mut old = reg.subscribe("req-4");
        let mut new = reg.subscribe("req-4");

        reg.sink("req-4").log("to the new one");

        assert!(new.recv().await.is_some());
        // Old sender was replaced; channel closed.
        assert!(old.recv().await.is_none());
    }

    #[test]
    fn percent_is_clamped_and_zero_safe() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(20, 10), 100);
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let e = ProgressEvent::Progress {
            task_index: 1,
            task_total: 3,
            page_current: Some(2),
            page_total: Some(10),
            percent: 20,
            status: "Transforming".into(),
            file: None,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"progress\""), "got: {json}");
        assert!(!json.contains("file"), "skipped when None, got: {json}");

        let t = ProgressEvent::ThumbnailInit {
            gray: None,
            color: "data:image/jpeg;base64,xxx".into(),
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"type\":\"thumbnail-init\""), "got: {json}");
    }
}
