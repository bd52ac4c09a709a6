//! Event types broadcast to status subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallguard system events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FallguardEvent {
    /// A pipeline worker started for a source
    PipelineStarted {
        source_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline worker stopped
    PipelineStopped {
        source_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// A fall passed confirmation and was persisted
    FallConfirmed {
        event_id: i64,
        source_id: i64,
        track_id: i64,
        score: f64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An operator acknowledged a fall alert
    FallResolved {
        event_id: i64,
        responder: String,
        timestamp: DateTime<Utc>,
    },
}

impl FallguardEvent {
    /// Source the event concerns; resolutions only carry the event id
    pub fn source_id(&self) -> Option<i64> {
        match self {
            FallguardEvent::PipelineStarted { source_id, .. }
            | FallguardEvent::PipelineStopped { source_id, .. }
            | FallguardEvent::FallConfirmed { source_id, .. } => Some(*source_id),
            FallguardEvent::FallResolved { .. } => None,
        }
    }

    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            FallguardEvent::PipelineStarted { .. } => "PipelineStarted",
            FallguardEvent::PipelineStopped { .. } => "PipelineStopped",
            FallguardEvent::FallConfirmed { .. } => "FallConfirmed",
            FallguardEvent::FallResolved { .. } => "FallResolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = FallguardEvent::FallResolved {
            event_id: 4,
            responder: "alice".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FallResolved");
        assert_eq!(json["event_id"], 4);
        assert_eq!(event.event_type(), "FallResolved");
    }
}
