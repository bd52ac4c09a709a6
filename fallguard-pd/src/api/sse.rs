//! Event stream over SSE
//!
//! Pipeline lifecycle, confirmed falls and resolutions. `?source_id=N` narrows the stream
//! to one source; resolutions are always delivered.

use crate::api::server::AppContext;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use fallguard_common::events::FallguardEvent;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    source_id: Option<i64>,
}

/// GET /events/stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE client connected (source filter {:?})", query.source_id);

    let filter = query.source_id;
    let stream = BroadcastStream::new(ctx.state.subscribe_events()).filter_map(move |result| async move {
        match result {
            Ok(event) if wanted(&event, filter) => to_sse_event(&event).map(Ok),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("SSE client lagged, {} events skipped", skipped);
                Some(Ok(Event::default().comment(format!("lagged {}", skipped))))
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn wanted(event: &FallguardEvent, filter: Option<i64>) -> bool {
    match (filter, event.source_id()) {
        (Some(wanted), Some(source_id)) => wanted == source_id,
        _ => true,
    }
}

fn to_sse_event(event: &FallguardEvent) -> Option<Event> {
    match Event::default().event(event.event_type()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.event_type(), e);
            None
        }
    }
}
