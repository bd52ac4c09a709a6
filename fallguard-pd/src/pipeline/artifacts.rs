//! Event artifacts on disk: snapshot JPEGs and encoded clips
//!
//! Both live flat in the snapshot directory under `<root>/snapshots`:
//! - `fall_{source}_{unix_ts}_{track}.jpg`
//! - `fall_clip_{source}_{unix_ts}_{track}.mp4`

use crate::capture::Frame;
use crate::detection::CompletedClip;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn snapshot_file_name(source_id: i64, unix_ts: i64, track_id: i64) -> String {
    format!("fall_{}_{}_{}.jpg", source_id, unix_ts, track_id)
}

pub fn clip_file_name(source_id: i64, unix_ts: i64, track_id: i64) -> String {
    format!("fall_clip_{}_{}_{}.mp4", source_id, unix_ts, track_id)
}

/// Writes snapshots and clips for one process
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    ffmpeg_path: String,
    clip_fps: u32,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, ffmpeg_path: impl Into<String>, clip_fps: u32) -> Self {
        Self {
            dir: dir.into(),
            ffmpeg_path: ffmpeg_path.into(),
            clip_fps: clip_fps.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Persistence(format!("{}: {}", self.dir.display(), e)))
    }

    /// Write an encoded snapshot, returning its path
    pub fn write_snapshot(
        &self,
        source_id: i64,
        unix_ts: i64,
        track_id: i64,
        jpeg: &[u8],
    ) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(snapshot_file_name(source_id, unix_ts, track_id));
        std::fs::write(&path, jpeg)
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
        debug!("Snapshot written: {}", path.display());
        Ok(path)
    }

    /// Encode a clip to H.264 MP4 through ffmpeg
    ///
    /// Blocking; frames whose size differs from the first frame are skipped.
    pub fn encode_clip(&self, source_id: i64, clip: &CompletedClip) -> Result<PathBuf> {
        let Some(first) = clip.frames.first() else {
            return Err(Error::Persistence(format!(
                "clip for track {} has no frames",
                clip.track_id
            )));
        };
        self.ensure_dir()?;

        let path = self
            .dir
            .join(clip_file_name(source_id, clip.timestamp as i64, clip.track_id));
        let size = format!("{}x{}", first.width, first.height);
        let fps = self.clip_fps.to_string();

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-s", &size, "-r", &fps, "-i", "-"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Persistence(format!("{}: {}", self.ffmpeg_path, e)))?;

        let written = match child.stdin.take() {
            Some(mut stdin) => write_frames(&mut stdin, first, &clip.frames),
            None => Err(Error::Persistence("ffmpeg stdin not captured".to_string())),
        };

        // stdin is closed above so ffmpeg sees end of input
        let status = child
            .wait()
            .map_err(|e| Error::Persistence(format!("ffmpeg wait: {}", e)))?;
        written?;
        if !status.success() {
            return Err(Error::Persistence(format!("ffmpeg exited with {}", status)));
        }

        info!(
            "Clip written: {} ({} frames)",
            path.display(),
            clip.frames.len()
        );
        Ok(path)
    }
}

fn write_frames(out: &mut impl Write, first: &Frame, frames: &[Arc<Frame>]) -> Result<usize> {
    let mut written = 0;
    for frame in frames {
        if frame.width != first.width || frame.height != first.height {
            warn!(
                "Skipping clip frame {} with size {}x{}",
                frame.sequence, frame.width, frame.height
            );
            continue;
        }
        out.write_all(&frame.data)
            .map_err(|e| Error::Persistence(format!("ffmpeg stdin: {}", e)))?;
        written += 1;
    }
    Ok(written)
}
