//! Per-source fall detector
//!
//! Wraps the pose oracle and the fall state machine for one stream:
//! - runs inference on 1 of every `inference_stride` frames; the frames in between
//!   redraw the last detections and never touch detection state
//! - optional night-mode contrast stretch before inference
//! - annotation of every frame
//! - clip buffering around confirmed falls

use super::annotate::{annotate, TrackMark};
use super::clip::{ClipRecorder, CompletedClip};
use super::fall::{DetectedFall, FallStateMachine, FallThresholds, FallVerdict};
use super::night;
use super::pose::{BBox, Detection, PoseOracle};
use crate::capture::Frame;
use crate::config::ClipConfig;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Track as shown on the latest annotated frame
#[derive(Debug, Clone, Serialize)]
pub struct TrackView {
    pub track_id: i64,
    pub bbox: BBox,
    pub state: TrackMark,
}

/// Result of one `process` call
#[derive(Debug)]
pub struct DetectorOutput {
    pub annotated: Frame,
    /// Confirmed falls; only ever non-empty on inferred frames
    pub falls: Vec<DetectedFall>,
    pub tracks: Vec<TrackView>,
    /// Whether the oracle ran on this frame
    pub inferred: bool,
    /// Clips that finished recording with this frame
    pub completed_clips: Vec<CompletedClip>,
}

pub struct FallDetector {
    stream_key: String,
    oracle: Arc<dyn PoseOracle>,
    machine: FallStateMachine,
    stride: u64,
    frame_count: u64,
    night_mode: Arc<AtomicBool>,
    cached: Option<(Vec<Detection>, HashMap<i64, TrackMark>)>,
    clips: ClipRecorder,
}

impl FallDetector {
    pub fn new(
        stream_key: impl Into<String>,
        oracle: Arc<dyn PoseOracle>,
        thresholds: FallThresholds,
        inference_stride: u32,
        night_mode: bool,
        clip_config: &ClipConfig,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            oracle,
            machine: FallStateMachine::new(thresholds),
            stride: inference_stride.max(1) as u64,
            frame_count: 0,
            night_mode: Arc::new(AtomicBool::new(night_mode)),
            cached: None,
            clips: ClipRecorder::new(clip_config),
        }
    }

    /// Shared night-mode flag, flipped from outside the worker thread
    pub fn night_mode_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.night_mode)
    }

    pub fn set_night_mode(&self, enabled: bool) {
        self.night_mode.store(enabled, Ordering::Relaxed);
        info!("Night mode for stream {} set to {}", self.stream_key, enabled);
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode.load(Ordering::Relaxed)
    }

    /// Whether confirmed falls will produce clips
    pub fn clips_enabled(&self) -> bool {
        self.clips.is_enabled()
    }

    pub fn state_machine(&self) -> &FallStateMachine {
        &self.machine
    }

    fn tracks(detections: &[Detection], marks: &HashMap<i64, TrackMark>) -> Vec<TrackView> {
        detections
            .iter()
            .map(|d| TrackView {
                track_id: d.track_id,
                bbox: d.bbox,
                state: marks.get(&d.track_id).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Process one captured frame
    ///
    /// Oracle failures propagate; the frame still counts toward the sampling cadence.
    pub fn process(&mut self, frame: Arc<Frame>) -> Result<DetectorOutput> {
        self.frame_count += 1;
        let completed_clips = self.clips.push(Arc::clone(&frame));

        if self.frame_count % self.stride != 0 {
            if let Some((detections, marks)) = &self.cached {
                return Ok(DetectorOutput {
                    annotated: annotate(&frame, detections, marks),
                    falls: Vec::new(),
                    tracks: Self::tracks(detections, marks),
                    inferred: false,
                    completed_clips,
                });
            }
        }

        let detections = if self.night_mode() {
            let enhanced = night::enhance(&frame);
            self.oracle.detect(&self.stream_key, &enhanced)?
        } else {
            self.oracle.detect(&self.stream_key, &frame)?
        };

        let now = if frame.timestamp_ms > 0 {
            frame.timestamp_secs()
        } else {
            fallguard_common::time::unix_seconds()
        };

        let mut marks = HashMap::new();
        let mut falls = Vec::new();
        for (track_id, verdict) in self.machine.observe_frame(&detections, now) {
            match verdict {
                FallVerdict::Pending { .. } => {
                    marks.insert(track_id, TrackMark::Pending);
                }
                FallVerdict::Confirmed(fall) => {
                    info!(
                        "Fall confirmed on stream {}: track {} score {:.2} ({})",
                        self.stream_key, fall.track_id, fall.fall_score, fall.reason
                    );
                    marks.insert(track_id, TrackMark::Fall);
                    self.clips.start(&fall);
                    falls.push(fall);
                }
                FallVerdict::Suppressed { .. } => {
                    debug!("Fall on track {} suppressed by cooldown", track_id);
                    marks.insert(track_id, TrackMark::Fall);
                }
                FallVerdict::Recovered { best_score } => {
                    debug!(
                        "Track {} recovered, pending fall cancelled (best score {:.2})",
                        track_id, best_score
                    );
                }
                FallVerdict::NoSignal | FallVerdict::Clear => {}
            }
        }

        let annotated = annotate(&frame, &detections, &marks);
        let tracks = Self::tracks(&detections, &marks);
        self.cached = Some((detections, marks));

        Ok(DetectorOutput {
            annotated,
            falls,
            tracks,
            inferred: true,
            completed_clips,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::geometry::tests::skeleton;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Oracle replaying scripted detections, then repeating the last one
    pub(crate) struct ScriptedOracle {
        script: Mutex<VecDeque<Vec<Detection>>>,
        last: Mutex<Vec<Detection>>,
        pub calls: Mutex<Vec<(String, u8)>>,
    }

    impl ScriptedOracle {
        pub(crate) fn new(script: Vec<Vec<Detection>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl PoseOracle for ScriptedOracle {
        fn model_id(&self) -> &str {
            "scripted"
        }

        fn detect(&self, stream_key: &str, frame: &Frame) -> Result<Vec<Detection>> {
            self.calls
                .lock()
                .unwrap()
                .push((stream_key.to_string(), frame.data.first().copied().unwrap_or(0)));
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            Ok(last.clone())
        }
    }

    fn frame_at(ms: i64, value: u8) -> Arc<Frame> {
        let mut frame = Frame::filled(320, 240, [value, value, value]);
        frame.timestamp_ms = ms;
        Arc::new(frame)
    }

    fn detector(oracle: Arc<ScriptedOracle>, stride: u32) -> FallDetector {
        FallDetector::new(
            "7",
            oracle,
            FallThresholds::default(),
            stride,
            false,
            &ClipConfig {
                enabled: true,
                fps: 2,
                pre_seconds: 1,
                post_seconds: 1,
            },
        )
    }

    #[test]
    fn test_inference_runs_on_one_in_three_frames() {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let mut detector = detector(oracle.clone(), 3);

        let inferred: Vec<bool> = (0..7)
            .map(|i| detector.process(frame_at(1_000 + i * 100, 0)).unwrap().inferred)
            .collect();
        // First frame always runs; then every third frame
        assert_eq!(inferred, vec![true, false, true, false, false, true, false]);
        assert_eq!(oracle.calls.lock().unwrap().len(), 3);
        assert_eq!(oracle.calls.lock().unwrap()[0].0, "7");
    }

    #[test]
    fn test_skipped_frames_redraw_without_events() {
        let lying = skeleton(1, BBox::new(160.0, 120.0, 180.0, 100.0), 70.0);
        let oracle = Arc::new(ScriptedOracle::new(vec![vec![lying]]));
        let mut detector = detector(oracle, 3);

        let first = detector.process(frame_at(1_000, 0)).unwrap();
        assert!(first.inferred);
        assert_eq!(first.tracks.len(), 1);

        let skipped = detector.process(frame_at(1_100, 0)).unwrap();
        assert!(!skipped.inferred);
        assert!(skipped.falls.is_empty());
        assert_eq!(skipped.tracks.len(), 1);
        // Box drawn from the cached detections
        assert_ne!(skipped.annotated.data, frame_at(0, 0).data);
    }

    #[test]
    fn test_night_mode_changes_oracle_input() {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let mut detector = detector(oracle.clone(), 1);

        let mut dark = Frame::filled(64, 1, [0, 0, 0]);
        for (i, px) in dark.data.chunks_exact_mut(3).enumerate() {
            let v = 10 + (i as u8 % 40);
            px.copy_from_slice(&[v, v, v]);
        }
        dark.timestamp_ms = 5_000;
        let dark = Arc::new(dark);

        detector.process(Arc::clone(&dark)).unwrap();
        detector.set_night_mode(true);
        assert!(detector.night_mode());
        detector.process(Arc::clone(&dark)).unwrap();

        let calls = oracle.calls.lock().unwrap();
        assert_eq!(calls[0].1, 10);
        // Stretched: the darkest pixel maps to black
        assert_eq!(calls[1].1, 0);
    }

    #[test]
    fn test_confirmed_fall_emitted_once_and_clip_recorded() {
        let lying = skeleton(1, BBox::new(160.0, 120.0, 180.0, 100.0), 70.0);
        let mut collapsed = lying.clone();
        collapsed.keypoints[crate::detection::pose::NOSE].y = collapsed.bbox.bottom() - 5.0;

        let oracle = Arc::new(ScriptedOracle::new(vec![vec![collapsed]]));
        let mut detector = detector(oracle, 1);

        let mut falls = Vec::new();
        let mut clips = Vec::new();
        // 10 fps for 4 s
        for i in 0..40 {
            let out = detector.process(frame_at(10_000 + i * 100, 0)).unwrap();
            falls.extend(out.falls);
            clips.extend(out.completed_clips);
        }

        assert_eq!(falls.len(), 1);
        assert!((falls[0].timestamp - 11.8).abs() < 1e-6);
        assert_eq!(falls[0].reason, "Angle, Ratio, Collapsed");
        // Pre-buffer of 2 frames plus 2 after
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].frames.len(), 4);
    }
}
