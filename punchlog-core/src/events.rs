//! Reconciliation event types and EventBus
//!
//! Downstream collaborators (cache warmers, notification relays, sync
//! bridges) subscribe to a broadcast channel. Publishing is best effort by
//! contract: a failed or unobserved publish never fails or rolls back the
//! ingest that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events emitted by the reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconEvent {
    /// A day record's canonical boundaries changed (ingest or repair)
    DayReconciled {
        employee_code: String,
        /// Canonical day key
        day: DateTime<Utc>,
        check_in_time: Option<DateTime<Utc>>,
        check_out_time: Option<DateTime<Utc>>,
        total_check_ins: i64,
        timestamp: DateTime<Utc>,
    },

    /// A repair batch finished
    RepairCompleted {
        employee_code: Option<String>,
        records_examined: u64,
        records_changed: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ReconEvent {
    /// Event type name as it appears in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconEvent::DayReconciled { .. } => "DayReconciled",
            ReconEvent::RepairCompleted { .. } => "RepairCompleted",
        }
    }
}

/// Broadcast bus for [`ReconEvent`].
///
/// Wraps `tokio::sync::broadcast`: every subscriber sees every event emitted
/// after it subscribed; slow subscribers lag and drop old events rather than
/// backpressuring the ingestion path.
pub struct EventBus {
    tx: broadcast::Sender<ReconEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers, best effort.
    ///
    /// Returns the number of subscribers that received it. Zero subscribers
    /// is normal (broadcast send fails only when no receiver exists).
    pub fn emit(&self, event: ReconEvent) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("No subscribers for {} event", event_type);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
