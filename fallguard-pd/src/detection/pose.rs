//! Pose oracle boundary types
//!
//! The pose network itself is an external collaborator. Given a frame it returns per-person
//! boxes, a track id that stays stable across calls for the same stream, and COCO-17
//! keypoints.

use crate::capture::Frame;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Keypoints per skeleton (COCO layout)
pub const KEYPOINT_COUNT: usize = 17;

pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;

/// COCO limb connections drawn on annotated frames
pub const SKELETON: [(usize, usize); 12] = [
    // Arms
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    // Legs
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
    // Torso
    (5, 6),
    (11, 12),
    (5, 11),
    (6, 12),
];

/// Single keypoint in image coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// Undetected keypoints are reported at the origin
    pub fn is_detected(&self) -> bool {
        self.x != 0.0 || self.y != 0.0
    }

    pub fn midpoint(&self, other: &Keypoint) -> (f32, f32) {
        ((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Center-based bounding box in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// Width over height; zero for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    pub fn left(&self) -> f32 {
        self.x_center - self.width / 2.0
    }

    pub fn top(&self) -> f32 {
        self.y_center - self.height / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.y_center + self.height / 2.0
    }
}

/// One tracked person in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub track_id: i64,
    pub bbox: BBox,
    /// COCO-17 keypoints; may be shorter when the oracle dropped the skeleton
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
    #[serde(default)]
    pub confidence: f32,
}

impl Detection {
    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }
}

/// Black-box multi-person pose estimator with tracking
pub trait PoseOracle: Send + Sync {
    /// Model identity this instance was loaded for
    fn model_id(&self) -> &str;

    /// Detect and track people; `stream_key` scopes track identity
    fn detect(&self, stream_key: &str, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Constructs oracles by model identity
pub trait OracleLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn PoseOracle>>;
}
