//! fallguard-pd configuration
//!
//! Loaded from `fallguard.toml`; every section and field is optional and falls back to
//! the compiled defaults below.

use crate::detection::fall::FallThresholds;
use fallguard_common::config::BotCredentials;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP port for the status surface
pub const DEFAULT_PORT: u16 = 5780;

/// Top-level TOML config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database and event artifacts
    pub root_folder: Option<PathBuf>,
    /// Status surface port
    pub port: Option<u16>,
    pub detection: DetectionConfig,
    pub capture: CaptureConfig,
    pub notify: NotifyConfig,
    pub model: ModelConfig,
    pub clip: ClipConfig,
}

/// Fall detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Run the pose oracle on 1 of every `inference_stride` frames
    pub inference_stride: u32,
    /// Start pipelines with night-mode preprocessing enabled
    pub night_mode: bool,
    #[serde(flatten)]
    pub thresholds: FallThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            inference_stride: 3,
            night_mode: false,
            thresholds: FallThresholds::default(),
        }
    }
}

/// Frame capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Decoded frame width in pixels
    pub width: u32,
    /// Decoded frame height in pixels
    pub height: u32,
    /// Frames buffered between capture and the worker
    pub queue_capacity: usize,
    /// Delay between captures, caps capture-side CPU
    pub capture_interval_ms: u64,
    /// Back-off after a failed live read or open
    pub reconnect_backoff_ms: u64,
    /// Bound on how long `stop()` waits for a thread to exit
    pub stop_timeout_ms: u64,
    /// ffmpeg binary used by the production capture backend
    pub ffmpeg_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            queue_capacity: 5,
            capture_interval_ms: 10,
            reconnect_backoff_ms: 1000,
            stop_timeout_ms: 2000,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Notification delivery and acknowledgement polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Process-wide default bot token (environment takes precedence)
    pub bot_token: Option<String>,
    /// Process-wide default chat id (environment takes precedence)
    pub chat_id: Option<String>,
    /// Bot API base URL
    pub api_base: String,
    /// Seconds between reminders for an unresolved event
    pub reminder_interval_secs: u64,
    /// Server-side long-poll timeout; the client timeout is always larger
    pub poll_timeout_secs: u64,
    /// Back-off after a failed poll
    pub poll_backoff_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            reminder_interval_secs: 10,
            poll_timeout_secs: 30,
            poll_backoff_secs: 5,
        }
    }
}

impl NotifyConfig {
    /// Default credentials from the config file, if both parts are set
    pub fn default_credentials(&self) -> Option<BotCredentials> {
        BotCredentials::from_parts(self.bot_token.as_deref(), self.chat_id.as_deref())
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Client-side timeout for a long-poll request, strictly above the server timeout
    pub fn poll_client_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + 5)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_secs(self.poll_backoff_secs)
    }
}

/// Pose oracle selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identity; pipelines requesting the same id share one oracle
    pub model_id: String,
    /// Inference server endpoint for the HTTP oracle
    pub endpoint: String,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// JPEG quality of frames sent for inference
    pub jpeg_quality: u8,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "yolov8n-pose".to_string(),
            endpoint: "http://127.0.0.1:8500".to_string(),
            timeout_ms: 2000,
            jpeg_quality: 85,
        }
    }
}

/// Event clip recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub enabled: bool,
    /// Nominal source frame rate, sizes the pre/post buffers and the encoded clip
    pub fps: u32,
    /// Seconds of video kept before a confirmed fall
    pub pre_seconds: u32,
    /// Seconds of video recorded after a confirmed fall
    pub post_seconds: u32,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 30,
            pre_seconds: 5,
            post_seconds: 5,
        }
    }
}

impl ClipConfig {
    pub fn pre_frames(&self) -> usize {
        (self.fps * self.pre_seconds) as usize
    }

    pub fn post_frames(&self) -> usize {
        (self.fps * self.post_seconds) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert!(config.root_folder.is_none());
        assert_eq!(config.detection.inference_stride, 3);
        assert_eq!(config.capture.queue_capacity, 5);
        assert_eq!(config.notify.reminder_interval_secs, 10);
        assert!(config.notify.default_credentials().is_none());
        assert_eq!(config.clip.pre_frames(), 150);
    }

    #[test]
    fn test_partial_sections_override() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000

            [detection]
            inference_stride = 2
            angle_threshold_deg = 50.0

            [notify]
            bot_token = "1:abc"
            chat_id = "-100"
            poll_timeout_secs = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.port, Some(6000));
        assert_eq!(config.detection.inference_stride, 2);
        assert_eq!(config.detection.thresholds.angle_threshold_deg, 50.0);
        // Untouched thresholds keep their defaults
        assert_eq!(config.detection.thresholds.confidence_threshold, 0.8);
        assert!(config.notify.default_credentials().is_some());
        assert!(config.notify.poll_client_timeout() > config.notify.poll_timeout());
    }
}
