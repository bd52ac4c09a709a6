//! Event clip buffering
//!
//! Every frame enters a bounded pre-event buffer. A confirmed fall starts a recording
//! seeded with the buffer; it completes after a fixed number of further frames and is then
//! handed back for encoding.

use super::fall::DetectedFall;
use crate::capture::Frame;
use crate::config::ClipConfig;
use std::collections::VecDeque;
use std::sync::Arc;

/// Frames covering one confirmed fall, oldest first
#[derive(Debug, Clone)]
pub struct CompletedClip {
    pub track_id: i64,
    /// Confirmation time (Unix seconds)
    pub timestamp: f64,
    pub score: f32,
    pub frames: Vec<Arc<Frame>>,
}

#[derive(Debug)]
struct ActiveClip {
    track_id: i64,
    timestamp: f64,
    score: f32,
    frames: Vec<Arc<Frame>>,
    target_len: usize,
}

#[derive(Debug)]
pub struct ClipRecorder {
    enabled: bool,
    pre_buffer: VecDeque<Arc<Frame>>,
    pre_capacity: usize,
    post_frames: usize,
    active: Vec<ActiveClip>,
}

impl ClipRecorder {
    pub fn new(config: &ClipConfig) -> Self {
        let pre_capacity = config.pre_frames().max(1);
        Self {
            enabled: config.enabled,
            pre_buffer: VecDeque::with_capacity(pre_capacity),
            pre_capacity,
            post_frames: config.post_frames(),
            active: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Recordings still collecting frames
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Add a frame to the pre-buffer and to every active recording
    ///
    /// Returns recordings that reached their length with this frame.
    pub fn push(&mut self, frame: Arc<Frame>) -> Vec<CompletedClip> {
        if !self.enabled {
            return Vec::new();
        }

        if self.pre_buffer.len() == self.pre_capacity {
            self.pre_buffer.pop_front();
        }
        self.pre_buffer.push_back(Arc::clone(&frame));

        let mut completed = Vec::new();
        let mut i = 0;
        while i < self.active.len() {
            self.active[i].frames.push(Arc::clone(&frame));
            if self.active[i].frames.len() >= self.active[i].target_len {
                let clip = self.active.swap_remove(i);
                completed.push(CompletedClip {
                    track_id: clip.track_id,
                    timestamp: clip.timestamp,
                    score: clip.score,
                    frames: clip.frames,
                });
            } else {
                i += 1;
            }
        }
        completed
    }

    /// Start a recording for a confirmed fall, seeded with the current pre-buffer
    pub fn start(&mut self, fall: &DetectedFall) {
        if !self.enabled {
            return;
        }
        let frames: Vec<Arc<Frame>> = self.pre_buffer.iter().cloned().collect();
        let target_len = frames.len() + self.post_frames;
        self.active.push(ActiveClip {
            track_id: fall.track_id,
            timestamp: fall.timestamp,
            score: fall.fall_score,
            frames,
            target_len,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pre_seconds: u32, post_seconds: u32) -> ClipConfig {
        ClipConfig {
            enabled: true,
            fps: 2,
            pre_seconds,
            post_seconds,
        }
    }

    fn frame(sequence: u64) -> Arc<Frame> {
        let mut frame = Frame::filled(1, 1, [0, 0, 0]);
        frame.sequence = sequence;
        Arc::new(frame)
    }

    fn fall(track_id: i64) -> DetectedFall {
        DetectedFall {
            track_id,
            fall_score: 0.9,
            is_fall: true,
            timestamp: 100.0,
            reason: "Angle".into(),
        }
    }

    #[test]
    fn test_clip_spans_pre_and_post_window() {
        // 2 fps: 4 frames before, 2 after
        let mut recorder = ClipRecorder::new(&config(2, 1));
        for i in 0..10 {
            assert!(recorder.push(frame(i)).is_empty());
        }
        recorder.start(&fall(7));
        assert_eq!(recorder.active(), 1);

        assert!(recorder.push(frame(10)).is_empty());
        let done = recorder.push(frame(11));
        assert_eq!(done.len(), 1);

        let sequences: Vec<u64> = done[0].frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![6, 7, 8, 9, 10, 11]);
        assert_eq!(done[0].track_id, 7);
        assert_eq!(recorder.active(), 0);
    }

    #[test]
    fn test_overlapping_recordings_complete_independently() {
        let mut recorder = ClipRecorder::new(&config(1, 1));
        recorder.push(frame(0));
        recorder.start(&fall(1));
        recorder.push(frame(1));
        recorder.start(&fall(2));

        let first = recorder.push(frame(2));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].track_id, 1);

        let second = recorder.push(frame(3));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].track_id, 2);
    }

    #[test]
    fn test_disabled_recorder_keeps_nothing() {
        let mut recorder = ClipRecorder::new(&ClipConfig {
            enabled: false,
            ..ClipConfig::default()
        });
        recorder.push(frame(0));
        recorder.start(&fall(1));
        assert_eq!(recorder.active(), 0);
        assert!(recorder.push(frame(1)).is_empty());
    }
}
