//! Acknowledgement polling loop, one per bot credential
//!
//! Long-polls the notifier's update feed, advancing the offset past every update it sees,
//! and applies each resolve action to the event store. Only the first resolve for an event
//! takes effect; later presses are acknowledged as already resolved and change nothing.

use super::workflow::resolved_caption;
use super::{ActionPress, Notifier};
use crate::error::{Error, Result};
use crate::store::EventStore;
use chrono::Utc;
use fallguard_common::db::FallEventRecord;
use fallguard_common::events::FallguardEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of applying one action press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// First resolve for the event; it is now resolved
    Resolved,
    /// Event was resolved earlier; nothing changed
    AlreadyResolved,
    /// Not a resolve action, or the event does not exist
    Ignored,
    /// Store error; the event is unchanged
    Failed,
}

/// Polling parameters
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Server-side long-poll timeout
    pub timeout: Duration,
    /// Pause after a failed poll
    pub backoff: Duration,
}

/// Transition the event to resolved, or `DuplicateResolution` when someone else already did
async fn apply_resolution(
    store: &dyn EventStore,
    event_id: i64,
    press: &ActionPress,
) -> Result<Option<FallEventRecord>> {
    let took_effect = store
        .mark_resolved(event_id, &press.responder_name, &press.responder_id, Utc::now())
        .await?;

    let event = store.load_event(event_id).await?;
    match event {
        Some(event) if took_effect => Ok(Some(event)),
        Some(_) => Err(Error::DuplicateResolution(event_id)),
        None => Ok(None),
    }
}

/// Apply one action press and acknowledge it
pub async fn resolve_action(
    notifier: &dyn Notifier,
    store: &dyn EventStore,
    events: &broadcast::Sender<FallguardEvent>,
    press: &ActionPress,
) -> ResolutionOutcome {
    let Some(event_id) = press.resolve_event_id() else {
        debug!("Ignoring action with payload {:?}", press.data);
        ack(notifier, press, None).await;
        return ResolutionOutcome::Ignored;
    };

    match apply_resolution(store, event_id, press).await {
        Ok(Some(event)) => {
            info!("Event {} resolved by {}", event_id, press.responder_name);
            ack(notifier, press, Some("Resolved")).await;

            if let Some(message_ref) = event.message_ref.as_deref() {
                if let Err(e) = notifier
                    .edit_caption(message_ref, &resolved_caption(&event))
                    .await
                {
                    warn!("Failed to edit alert for event {}: {}", event_id, e);
                }
            }

            // No subscribers is fine
            let _ = events.send(FallguardEvent::FallResolved {
                event_id,
                responder: press.responder_name.clone(),
                timestamp: event.resolved_at.unwrap_or_else(Utc::now),
            });
            ResolutionOutcome::Resolved
        }
        Ok(None) => {
            warn!("Resolve action for unknown event {}", event_id);
            ack(notifier, press, Some("Event not found")).await;
            ResolutionOutcome::Ignored
        }
        Err(Error::DuplicateResolution(_)) => {
            debug!("Event {} already resolved, ignoring {}", event_id, press.responder_name);
            ack(notifier, press, Some("Already resolved")).await;
            ResolutionOutcome::AlreadyResolved
        }
        Err(e) => {
            error!("Failed to resolve event {}: {}", event_id, e);
            ack(notifier, press, Some("Could not resolve, please retry")).await;
            ResolutionOutcome::Failed
        }
    }
}

async fn ack(notifier: &dyn Notifier, press: &ActionPress, text: Option<&str>) {
    if let Err(e) = notifier.ack_action(&press.action_id, text).await {
        warn!("Failed to acknowledge action {}: {}", press.action_id, e);
    }
}

/// Spawn the polling loop for one bot; it runs until `shutdown` is cancelled
pub fn spawn_poller(
    rt_handle: &Handle,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn EventStore>,
    events: broadcast::Sender<FallguardEvent>,
    settings: PollSettings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    rt_handle.spawn(async move {
        info!("Polling loop started for bot {}", notifier.credential_key());
        let mut offset: i64 = 0;

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = notifier.poll_updates(offset, settings.timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(press) = update.action {
                            resolve_action(notifier.as_ref(), store.as_ref(), &events, &press).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Polling failed for bot {}: {}, retrying in {:?}",
                        notifier.credential_key(),
                        e,
                        settings.backoff
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(settings.backoff) => {}
                    }
                }
            }
        }

        info!("Polling loop stopped for bot {}", notifier.credential_key());
    })
}
