//! ffmpeg subprocess capture backend
//!
//! Decodes any source ffmpeg understands into raw BGR24 frames of a fixed size on stdout.
//! Local device indices map to v4l2 `/dev/videoN`. Rewinding a file restarts the process.

use super::device::{CaptureBackend, CaptureDevice, ReleaseHandle, SourceLocator, SourceMode};
use super::frame::Frame;
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Production backend spawning one `ffmpeg` per open device
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: String,
    width: u32,
    height: u32,
}

impl FfmpegBackend {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            width: config.width,
            height: config.height,
        }
    }

    /// ffmpeg argument list for a locator
    pub fn command_args(&self, locator: &SourceLocator, mode: SourceMode) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match locator {
            SourceLocator::Device(index) => {
                args.extend(["-f".into(), "v4l2".into(), "-i".into(), format!("/dev/video{}", index)]);
            }
            SourceLocator::Url(url) => {
                if mode == SourceMode::File {
                    // Pace file playback at native frame rate
                    args.push("-re".into());
                }
                if url.starts_with("rtsp://") {
                    args.extend(["-rtsp_transport".into(), "tcp".into()]);
                }
                args.extend(["-i".into(), url.clone()]);
            }
        }

        args.extend([
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]);
        args
    }

    fn spawn(&self, locator: &SourceLocator, mode: SourceMode) -> Result<(Child, ChildStdout)> {
        let args = self.command_args(locator, mode);
        debug!("Spawning {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::SourceUnavailable(format!("{}: {}", locator, e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::SourceUnavailable(format!("{}: ffmpeg stdout not captured", locator))
        })?;
        Ok((child, stdout))
    }
}

impl CaptureBackend for FfmpegBackend {
    fn open(&self, locator: &SourceLocator, mode: SourceMode) -> Result<Box<dyn CaptureDevice>> {
        let (child, stdout) = self.spawn(locator, mode)?;
        Ok(Box::new(FfmpegDevice {
            backend: self.clone(),
            locator: locator.clone(),
            mode,
            child: Arc::new(Mutex::new(Some(child))),
            stdout: Some(stdout),
        }))
    }
}

/// One running ffmpeg process
struct FfmpegDevice {
    backend: FfmpegBackend,
    locator: SourceLocator,
    mode: SourceMode,
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
}

fn kill_child(slot: &Mutex<Option<Child>>) {
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(mut child) = guard.take() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl CaptureDevice for FfmpegDevice {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::FrameDecode(format!("{}: device released", self.locator)))?;

        let mut data = vec![0u8; Frame::byte_len(self.backend.width, self.backend.height)];
        match stdout.read_exact(&mut data) {
            Ok(()) => Ok(Some(Frame::from_bgr(
                data,
                self.backend.width,
                self.backend.height,
            )?)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::FrameDecode(format!("{}: {}", self.locator, e))),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.release();
        let (child, stdout) = self.backend.spawn(&self.locator, self.mode)?;
        self.child = Arc::new(Mutex::new(Some(child)));
        self.stdout = Some(stdout);
        Ok(())
    }

    fn release_handle(&self) -> ReleaseHandle {
        let slot = Arc::clone(&self.child);
        ReleaseHandle::new(move || kill_child(&slot))
    }

    fn release(&mut self) {
        self.stdout = None;
        kill_child(&self.child);
    }
}

impl Drop for FfmpegDevice {
    fn drop(&mut self) {
        kill_child(&self.child);
    }
}
