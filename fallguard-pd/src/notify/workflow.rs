//! Alert delivery and reminder loop for one confirmed fall
//!
//! The alert task sends the snapshot with its resolve action, records the message reference,
//! then re-checks the event every reminder interval and repeats the alert as text until the
//! event is resolved or the task is cancelled. Delivery failures are logged and never reach
//! the worker that spawned the task.

use super::{resolve_action_ref, Notifier};
use crate::error::Result;
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use fallguard_common::db::FallEventRecord;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on one uninterrupted sleep inside the reminder loop
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Confirmed fall handed to the notification workflow
#[derive(Debug, Clone)]
pub struct FallAlert {
    pub event_id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub track_id: i64,
    pub score: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Annotated snapshot, JPEG
    pub snapshot: Vec<u8>,
}

impl FallAlert {
    pub fn caption(&self) -> String {
        format!(
            "FALL DETECTED\nSource: {} (#{})\nTrack: {}\nScore: {:.2}\nReason: {}\nTime: {}",
            self.source_name,
            self.source_id,
            self.track_id,
            self.score,
            self.reason,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    fn reminder_text(&self) -> String {
        format!(
            "REMINDER: fall on {} at {} (event {}) is still unresolved",
            self.source_name,
            self.timestamp.format("%H:%M:%S UTC"),
            self.event_id
        )
    }
}

/// Caption an alert is edited to once resolved
pub fn resolved_caption(event: &FallEventRecord) -> String {
    let responder = event.responder_name.as_deref().unwrap_or("unknown");
    let resolved_at = event
        .resolved_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();
    format!(
        "RESOLVED\nSource: #{}\nTrack: {}\nScore: {:.2}\nReason: {}\nTime: {}\nResolved by {} at {}",
        event.source_id,
        event.track_id,
        event.score,
        event.reason,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        responder,
        resolved_at
    )
}

/// What an alert task needs besides the alert itself
#[derive(Clone)]
pub struct AlertContext {
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn EventStore>,
    pub reminder_interval: Duration,
}

/// Spawn the alert and reminder task for one event
pub fn spawn_alert(
    rt_handle: &Handle,
    ctx: AlertContext,
    alert: FallAlert,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    rt_handle.spawn(async move { run_alert(ctx, alert, cancel).await })
}

async fn run_alert(ctx: AlertContext, mut alert: FallAlert, cancel: CancellationToken) {
    let event_id = alert.event_id;
    let image = std::mem::take(&mut alert.snapshot);

    match ctx
        .notifier
        .send_alert(image, &alert.caption(), &resolve_action_ref(event_id))
        .await
    {
        Ok(Some(message_ref)) => {
            info!("Alert for event {} sent ({})", event_id, message_ref);
            if let Err(e) = ctx.store.set_message_ref(event_id, &message_ref).await {
                error!("Failed to store message ref for event {}: {}", event_id, e);
            }
        }
        Ok(None) => info!("Alert for event {} sent", event_id),
        Err(e) => error!("Failed to send alert for event {}: {}", event_id, e),
    }

    loop {
        if !sleep_unless_cancelled(ctx.reminder_interval, &cancel).await {
            debug!("Reminders for event {} cancelled", event_id);
            return;
        }

        match ctx.store.load_event(event_id).await {
            Ok(Some(event)) if event.is_resolved => {
                info!(
                    "Event {} resolved by {}, reminders stopped",
                    event_id,
                    event.responder_name.as_deref().unwrap_or("unknown")
                );
                return;
            }
            Ok(Some(_)) => {
                if let Err(e) = ctx.notifier.send_reminder(&alert.reminder_text()).await {
                    warn!("Failed to send reminder for event {}: {}", event_id, e);
                }
            }
            Ok(None) => {
                warn!("Event {} no longer exists, reminders stopped", event_id);
                return;
            }
            Err(e) => warn!("Failed to reload event {}: {}", event_id, e),
        }
    }
}

/// Sleep in slices of at most one second; `false` when cancelled first
async fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        let slice = remaining.min(SLEEP_SLICE);
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(slice) => {}
        }
        remaining -= slice;
    }
    !cancel.is_cancelled()
}

/// Attach an encoded clip to its event and send it to the event's chat
pub async fn deliver_clip(
    notifier: &dyn Notifier,
    store: &dyn EventStore,
    event_id: i64,
    path: &Path,
) -> Result<()> {
    store
        .set_clip_path(event_id, &path.to_string_lossy())
        .await?;
    notifier
        .send_clip(path, &format!("Clip for fall event {}", event_id))
        .await
}
