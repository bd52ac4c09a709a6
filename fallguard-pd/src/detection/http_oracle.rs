//! HTTP pose oracle client
//!
//! Posts JPEG-encoded frames to a pose/tracking inference server and reads detections back
//! as JSON. The server keeps per-stream tracker state keyed by the `stream` query parameter.
//!
//! Called from pipeline worker threads, which sit outside the runtime, so requests are
//! driven through a captured runtime handle.

use super::pose::{Detection, OracleLoader, PoseOracle};
use crate::capture::Frame;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

const USER_AGENT: &str = concat!("fallguard-pd/", env!("CARGO_PKG_VERSION"));

/// Inference server response body
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

pub struct HttpPoseOracle {
    model_id: String,
    detect_url: String,
    jpeg_quality: u8,
    http_client: reqwest::Client,
    rt_handle: Handle,
}

impl HttpPoseOracle {
    pub fn new(model_id: &str, config: &ModelConfig, rt_handle: Handle) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Oracle(e.to_string()))?;

        Ok(Self {
            model_id: model_id.to_string(),
            detect_url: format!("{}/v1/detect", config.endpoint.trim_end_matches('/')),
            jpeg_quality: config.jpeg_quality,
            http_client,
            rt_handle,
        })
    }

    async fn request(&self, stream_key: &str, body: Vec<u8>) -> Result<Vec<Detection>> {
        let response = self
            .http_client
            .post(&self.detect_url)
            .query(&[("model", self.model_id.as_str()), ("stream", stream_key)])
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Oracle(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Oracle(format!("inference server returned {}: {}", status, text)));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| Error::Oracle(format!("bad inference response: {}", e)))?;
        Ok(parsed.detections)
    }
}

impl PoseOracle for HttpPoseOracle {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn detect(&self, stream_key: &str, frame: &Frame) -> Result<Vec<Detection>> {
        let body = frame.encode_jpeg(self.jpeg_quality)?;
        let detections = self.rt_handle.block_on(self.request(stream_key, body))?;
        debug!(
            stream = stream_key,
            count = detections.len(),
            "Pose oracle returned detections"
        );
        Ok(detections)
    }
}

/// Builds [`HttpPoseOracle`]s against the configured inference server
pub struct HttpOracleLoader {
    config: ModelConfig,
    rt_handle: Handle,
}

impl HttpOracleLoader {
    pub fn new(config: ModelConfig, rt_handle: Handle) -> Self {
        Self { config, rt_handle }
    }
}

impl OracleLoader for HttpOracleLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn PoseOracle>> {
        let oracle = HttpPoseOracle::new(model_id, &self.config, self.rt_handle.clone())?;
        Ok(Arc::new(oracle))
    }
}
