//! Skeleton geometry used by the fall heuristics

use super::pose::{Detection, LEFT_HIP, LEFT_SHOULDER, NOSE, RIGHT_HIP, RIGHT_SHOULDER};
use crate::error::{Error, Result};

/// Torso angle from vertical in degrees, from the mid-shoulder/mid-hip line
///
/// Fails with `InsufficientKeypoints` when the skeleton is too short or any one of the
/// four shoulder and hip joints was not detected. A half-seen pair gives no midpoint.
pub fn torso_angle_deg(detection: &Detection) -> Result<f32> {
    let insufficient = || Error::InsufficientKeypoints(detection.track_id);

    let left_shoulder = detection.keypoint(LEFT_SHOULDER).ok_or_else(insufficient)?;
    let right_shoulder = detection.keypoint(RIGHT_SHOULDER).ok_or_else(insufficient)?;
    let left_hip = detection.keypoint(LEFT_HIP).ok_or_else(insufficient)?;
    let right_hip = detection.keypoint(RIGHT_HIP).ok_or_else(insufficient)?;

    if !left_shoulder.is_detected()
        || !right_shoulder.is_detected()
        || !left_hip.is_detected()
        || !right_hip.is_detected()
    {
        return Err(insufficient());
    }

    let (shoulder_x, shoulder_y) = left_shoulder.midpoint(right_shoulder);
    let (hip_x, hip_y) = left_hip.midpoint(right_hip);
    let dx = (shoulder_x - hip_x).abs();
    let dy = (shoulder_y - hip_y).abs();

    Ok(dx.atan2(dy).to_degrees())
}

/// Whether the head (nose) sits within `ratio` box-heights of the box bottom
pub fn head_near_ground(detection: &Detection, ratio: f32) -> bool {
    match detection.keypoint(NOSE) {
        Some(nose) if nose.is_detected() => {
            let bbox = &detection.bbox;
            bbox.bottom() - nose.y < ratio * bbox.height
        }
        _ => false,
    }
}
