//! Per-track fall state machine
//!
//! Each processed frame scores every tracked person from static posture (torso angle,
//! box aspect ratio) and dynamics (downward velocity, head near the ground). A scoring
//! frame opens a pending record; the record is confirmed only if the person stays down
//! long enough, and is cancelled if they are seen upright for long enough. Confirmed falls
//! for a track are rate limited by a cooldown.
//!
//! Times are fractional Unix seconds supplied by the caller.

use super::geometry::{head_near_ground, torso_angle_deg};
use super::pose::Detection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Slack for comparing elapsed times built from float timestamps
const TIME_EPSILON: f64 = 1e-6;

/// Tunable thresholds; defaults are the field-tested values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallThresholds {
    /// Torso angle from vertical above which the pose looks fallen
    pub angle_threshold_deg: f32,
    /// Box width/height above which the pose looks fallen
    pub aspect_ratio_threshold: f32,
    /// Downward speed in box-heights per second counted as a fast drop
    pub velocity_threshold: f32,
    /// Head within this fraction of box height from the box bottom counts as collapsed
    pub head_low_ratio: f32,
    /// Minimum cumulative score for a fall candidate
    pub confidence_threshold: f32,

    pub angle_score: f32,
    pub ratio_score: f32,
    pub velocity_score: f32,
    pub collapse_score: f32,

    pub upright_angle_deg: f32,
    pub upright_ratio: f32,
    pub lying_angle_deg: f32,
    pub lying_ratio: f32,

    /// Time a pending fall must stay down before it is confirmed
    pub confirm_secs: f64,
    /// Continuous upright time that cancels a pending fall
    pub recovery_secs: f64,
    /// Minimum spacing between confirmed falls of one track
    pub cooldown_secs: f64,

    /// Samples of box history kept per track
    pub history_len: usize,
    /// Sample spacing used for velocity estimates
    pub velocity_spacing: usize,
    /// Tracks unseen for longer than this are forgotten
    pub track_ttl_secs: f64,
}

impl Default for FallThresholds {
    fn default() -> Self {
        Self {
            angle_threshold_deg: 55.0,
            aspect_ratio_threshold: 1.5,
            velocity_threshold: 0.5,
            head_low_ratio: 0.4,
            confidence_threshold: 0.8,
            angle_score: 0.6,
            ratio_score: 0.4,
            velocity_score: 0.4,
            collapse_score: 0.3,
            upright_angle_deg: 35.0,
            upright_ratio: 1.15,
            lying_angle_deg: 60.0,
            lying_ratio: 1.65,
            confirm_secs: 1.8,
            recovery_secs: 0.6,
            cooldown_secs: 5.0,
            history_len: 60,
            velocity_spacing: 5,
            track_ttl_secs: 3.0,
        }
    }
}

/// Hysteresis posture classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Upright,
    Lying,
    Transitional,
}

/// Single frame's evidence for one track
#[derive(Debug, Clone, PartialEq)]
pub struct FallAssessment {
    pub angle_deg: f32,
    pub aspect_ratio: f32,
    pub score: f32,
    pub reasons: Vec<&'static str>,
    /// Static pose alone looks like a fall
    pub pose_candidate: bool,
    /// Pose candidate with a score at or above the confidence threshold
    pub fall_candidate: bool,
    pub posture: Posture,
}

impl FallAssessment {
    pub fn reason(&self) -> String {
        self.reasons.join(", ")
    }
}

/// Confirmed fall ready for persistence and notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedFall {
    pub track_id: i64,
    pub fall_score: f32,
    pub is_fall: bool,
    pub timestamp: f64,
    pub reason: String,
}

/// Outcome of feeding one observation to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum FallVerdict {
    /// Skeleton unusable this frame; state untouched
    NoSignal,
    /// Nothing pending, nothing suspicious
    Clear,
    /// Under observation; best score so far
    Pending { best_score: f32 },
    /// Pending fall cancelled after the person stood back up
    Recovered { best_score: f32 },
    /// Fall confirmed
    Confirmed(DetectedFall),
    /// Would have confirmed, but the track is inside its cooldown window
    Suppressed { best_score: f32 },
}

#[derive(Debug, Clone, Copy)]
struct TrackSample {
    timestamp: f64,
    y_center: f32,
}

#[derive(Debug, Clone)]
struct PendingFall {
    start_time: f64,
    best_score: f32,
    best_reason: String,
    recovered_since: Option<f64>,
    /// Most recent upright frame; the lying window restarts after it
    last_upright: Option<f64>,
}

impl PendingFall {
    /// Start of the current continuous non-upright stretch
    fn down_since(&self) -> f64 {
        self.last_upright.map_or(self.start_time, |t| t.max(self.start_time))
    }
}

/// Fall state for every track of one source
///
/// Owned by a single pipeline worker; all mutation happens on that thread.
#[derive(Debug)]
pub struct FallStateMachine {
    thresholds: FallThresholds,
    history: HashMap<i64, VecDeque<TrackSample>>,
    pending: HashMap<i64, PendingFall>,
    cooldown: HashMap<i64, f64>,
    last_seen: HashMap<i64, f64>,
}

impl FallStateMachine {
    pub fn new(thresholds: FallThresholds) -> Self {
        Self {
            thresholds,
            history: HashMap::new(),
            pending: HashMap::new(),
            cooldown: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &FallThresholds {
        &self.thresholds
    }

    /// Number of tracks with live history
    pub fn tracked(&self) -> usize {
        self.history.len()
    }

    pub fn is_pending(&self, track_id: i64) -> bool {
        self.pending.contains_key(&track_id)
    }

    fn classify(&self, angle_deg: f32, aspect_ratio: f32) -> Posture {
        let t = &self.thresholds;
        if angle_deg < t.upright_angle_deg && aspect_ratio < t.upright_ratio {
            Posture::Upright
        } else if angle_deg > t.lying_angle_deg || aspect_ratio > t.lying_ratio {
            Posture::Lying
        } else {
            Posture::Transitional
        }
    }

    /// Maximum downward speed over the retained history, in box-heights per second
    fn peak_velocity(&self, track_id: i64, current_height: f32) -> f32 {
        let spacing = self.thresholds.velocity_spacing.max(1);
        let Some(history) = self.history.get(&track_id) else {
            return 0.0;
        };
        if current_height <= 0.0 || history.len() <= spacing {
            return 0.0;
        }

        let mut peak = 0.0_f32;
        for i in spacing..history.len() {
            let curr = history[i];
            let prev = history[i - spacing];
            let dt = curr.timestamp - prev.timestamp;
            if dt <= 0.0 {
                continue;
            }
            let v = ((curr.y_center - prev.y_center) as f64 / dt) as f32 / current_height;
            peak = peak.max(v);
        }
        peak
    }

    /// Score one detection against current history without changing state
    ///
    /// `None` when the skeleton lacks the joints for a torso angle.
    pub fn assess(&self, detection: &Detection) -> Option<FallAssessment> {
        let t = &self.thresholds;
        let angle_deg = torso_angle_deg(detection).ok()?;
        let aspect_ratio = detection.bbox.aspect_ratio();

        let mut score = 0.0_f32;
        let mut reasons = Vec::new();
        if angle_deg > t.angle_threshold_deg {
            score += t.angle_score;
            reasons.push("Angle");
        }
        if aspect_ratio > t.aspect_ratio_threshold {
            score += t.ratio_score;
            reasons.push("Ratio");
        }
        let pose_candidate = !reasons.is_empty();

        if pose_candidate {
            if self.peak_velocity(detection.track_id, detection.bbox.height) > t.velocity_threshold {
                score += t.velocity_score;
                reasons.push("Velocity");
            } else if head_near_ground(detection, t.head_low_ratio) {
                score += t.collapse_score;
                reasons.push("Collapsed");
            }
        }

        let score = score.min(1.0);
        Some(FallAssessment {
            angle_deg,
            aspect_ratio,
            score,
            fall_candidate: pose_candidate && score + 1e-6 >= t.confidence_threshold,
            pose_candidate,
            reasons,
            posture: self.classify(angle_deg, aspect_ratio),
        })
    }

    fn record_sample(&mut self, detection: &Detection, now: f64) {
        let capacity = self.thresholds.history_len.max(1);
        let history = self
            .history
            .entry(detection.track_id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if history.len() == capacity {
            history.pop_front();
        }
        history.push_back(TrackSample {
            timestamp: now,
            y_center: detection.bbox.y_center,
        });
        self.last_seen.insert(detection.track_id, now);
    }

    /// Feed one detection observed at `now`
    pub fn update(&mut self, detection: &Detection, now: f64) -> FallVerdict {
        self.record_sample(detection, now);

        let Some(assessment) = self.assess(detection) else {
            return FallVerdict::NoSignal;
        };
        let track_id = detection.track_id;

        let Some(pending) = self.pending.get_mut(&track_id) else {
            if assessment.fall_candidate {
                self.pending.insert(
                    track_id,
                    PendingFall {
                        start_time: now,
                        best_score: assessment.score,
                        best_reason: assessment.reason(),
                        recovered_since: None,
                        last_upright: None,
                    },
                );
                return FallVerdict::Pending {
                    best_score: assessment.score,
                };
            }
            return FallVerdict::Clear;
        };

        if assessment.fall_candidate && assessment.score > pending.best_score {
            pending.best_score = assessment.score;
            pending.best_reason = assessment.reason();
        }

        match assessment.posture {
            Posture::Upright => {
                pending.last_upright = Some(now);
                let since = *pending.recovered_since.get_or_insert(now);
                if now - since + TIME_EPSILON >= self.thresholds.recovery_secs {
                    let best_score = pending.best_score;
                    self.pending.remove(&track_id);
                    return FallVerdict::Recovered { best_score };
                }
                FallVerdict::Pending {
                    best_score: pending.best_score,
                }
            }
            Posture::Lying
                if now - pending.down_since() + TIME_EPSILON >= self.thresholds.confirm_secs =>
            {
                let best_score = pending.best_score;
                let reason = std::mem::take(&mut pending.best_reason);
                self.pending.remove(&track_id);
                self.confirm(track_id, best_score, reason, now)
            }
            _ => {
                // Any non-upright frame breaks recovery continuity
                pending.recovered_since = None;
                FallVerdict::Pending {
                    best_score: pending.best_score,
                }
            }
        }
    }

    fn confirm(&mut self, track_id: i64, score: f32, reason: String, now: f64) -> FallVerdict {
        if let Some(last) = self.cooldown.get(&track_id) {
            if now - last < self.thresholds.cooldown_secs {
                return FallVerdict::Suppressed { best_score: score };
            }
        }
        self.cooldown.insert(track_id, now);
        FallVerdict::Confirmed(DetectedFall {
            track_id,
            fall_score: score,
            is_fall: true,
            timestamp: now,
            reason,
        })
    }

    /// Feed every detection of one processed frame, then evict stale tracks
    pub fn observe_frame(&mut self, detections: &[Detection], now: f64) -> Vec<(i64, FallVerdict)> {
        let verdicts = detections
            .iter()
            .map(|detection| (detection.track_id, self.update(detection, now)))
            .collect();
        self.collect_garbage(now);
        verdicts
    }

    /// Drop history and pending state for tracks unseen past the TTL, and expired cooldowns
    pub fn collect_garbage(&mut self, now: f64) {
        let ttl = self.thresholds.track_ttl_secs;
        let stale: Vec<i64> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now - **seen > ttl)
            .map(|(id, _)| *id)
            .collect();

        for track_id in stale {
            self.last_seen.remove(&track_id);
            self.history.remove(&track_id);
            self.pending.remove(&track_id);
        }

        let cooldown = self.thresholds.cooldown_secs;
        self.cooldown.retain(|_, last| now - *last < cooldown);
    }
}
