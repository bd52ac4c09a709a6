//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Notification group: sources in a group share a bot/chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub chat_id: Option<String>,
    /// Never serialized into API responses
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
}

/// How a source is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Network stream (RTSP/HTTP); read failures back off and retry
    Live,
    /// Video file; end-of-stream loops back to the first frame
    File,
    /// Local capture device selected by index
    Webcam,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Live => "live",
            SourceKind::File => "file",
            SourceKind::Webcam => "webcam",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, SourceKind::File)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" | "rtsp" | "http" => Ok(SourceKind::Live),
            "file" => Ok(SourceKind::File),
            "webcam" | "device" => Ok(SourceKind::Webcam),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown source kind: {}",
                other
            ))),
        }
    }
}

/// Registered video source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSource {
    pub id: i64,
    pub name: String,
    pub source_url: String,
    pub kind: SourceKind,
    pub group_id: Option<i64>,
    pub is_active: bool,
}

/// A confirmed fall ready to be persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFallEvent {
    pub source_id: i64,
    pub track_id: i64,
    pub score: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot_path: Option<String>,
}

/// Persisted fall event, including resolution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallEventRecord {
    pub id: i64,
    pub source_id: i64,
    pub track_id: i64,
    pub score: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot_path: Option<String>,
    pub clip_path: Option<String>,
    pub is_resolved: bool,
    pub responder_name: Option<String>,
    pub responder_id: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message_ref: Option<String>,
}
