//! Shared process state
//!
//! Thread-safe state handed to the manager, the workers and the status surface.

use chrono::{DateTime, Utc};
use fallguard_common::events::FallguardEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the system event channel; slow SSE clients lag rather than block senders
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<FallguardEvent>,

    /// Process-wide shutdown; reminder and polling loops observe it
    pub shutdown: CancellationToken,

    pub started_at: DateTime<Utc>,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            event_tx,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: FallguardEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<FallguardEvent> {
        self.event_tx.subscribe()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
