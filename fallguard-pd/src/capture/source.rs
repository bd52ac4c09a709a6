//! Frame source: one capture thread per video source
//!
//! The capture thread opens the device lazily, stamps each decoded frame and pushes it
//! into a drop-oldest [`FrameQueue`]. Failures never end the thread:
//! - file sources rewind to the first frame on end-of-stream or read error
//! - live sources drop the device, back off and reopen, forever
//! - open failures back off and retry

use super::device::{CaptureBackend, CaptureDevice, ReleaseHandle, SourceLocator, SourceMode};
use super::frame::Frame;
use super::queue::FrameQueue;
use crate::config::CaptureConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep inside the capture thread, bounds stop latency
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Capture counters
#[derive(Debug, Default)]
pub struct CaptureStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    read_failures: AtomicU64,
    open_failures: AtomicU64,
    rewinds: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CaptureStatsSnapshot {
    pub captured: u64,
    pub dropped: u64,
    pub read_failures: u64,
    pub open_failures: u64,
    pub rewinds: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
        }
    }
}

/// Everything the capture thread needs
struct CaptureContext {
    source_id: i64,
    locator: SourceLocator,
    mode: SourceMode,
    backend: Arc<dyn CaptureBackend>,
    queue: FrameQueue,
    running: Arc<AtomicBool>,
    release: Arc<Mutex<Option<ReleaseHandle>>>,
    stats: Arc<CaptureStats>,
    interval: Duration,
    backoff: Duration,
}

/// Owns one capture device and its frame queue
pub struct FrameSource {
    source_id: i64,
    locator: SourceLocator,
    mode: SourceMode,
    backend: Arc<dyn CaptureBackend>,
    queue: FrameQueue,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    release: Arc<Mutex<Option<ReleaseHandle>>>,
    stats: Arc<CaptureStats>,
    config: CaptureConfig,
}

impl FrameSource {
    pub fn new(
        source_id: i64,
        locator: SourceLocator,
        mode: SourceMode,
        backend: Arc<dyn CaptureBackend>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            source_id,
            locator,
            mode,
            backend,
            queue: FrameQueue::new(config.queue_capacity),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            release: Arc::new(Mutex::new(None)),
            stats: Arc::new(CaptureStats::default()),
            config: config.clone(),
        }
    }

    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    /// Frames currently buffered
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the capture thread; no-op if already running
    pub fn start(&self) -> crate::error::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let ctx = CaptureContext {
            source_id: self.source_id,
            locator: self.locator.clone(),
            mode: self.mode,
            backend: Arc::clone(&self.backend),
            queue: self.queue.clone(),
            running: Arc::clone(&self.running),
            release: Arc::clone(&self.release),
            stats: Arc::clone(&self.stats),
            interval: self.config.capture_interval(),
            backoff: self.config.reconnect_backoff(),
        };

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.source_id))
            .spawn(move || capture_loop(ctx))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                crate::error::Error::Internal(format!("failed to spawn capture thread: {}", e))
            })?;

        *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Frame source {} started ({})", self.source_id, self.locator);
        Ok(())
    }

    /// Signal the capture thread and wait a bounded time for it
    ///
    /// If the thread is still blocked in the device after the timeout, the device is
    /// force-released and the thread is detached.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if join_with_timeout(handle, self.config.stop_timeout()) {
                debug!("Capture thread for source {} joined", self.source_id);
            } else {
                warn!(
                    "Capture thread for source {} did not exit within {:?}, releasing device",
                    self.source_id,
                    self.config.stop_timeout()
                );
                let release = self.release.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(release) = release {
                    release.release();
                }
            }
        }

        self.queue.clear();
        info!("Frame source {} stopped", self.source_id);
    }

    /// Oldest buffered frame, never blocks
    pub fn read(&self) -> Option<Frame> {
        self.queue.pop()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Join a thread, giving up after `timeout`
///
/// Returns `true` if the thread finished in time.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("Joined thread had panicked");
    }
    true
}

/// Sleep up to `duration`, waking early once `running` clears
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::Acquire) {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn drop_device(ctx: &CaptureContext, device: &mut Option<Box<dyn CaptureDevice>>) {
    if let Some(mut dev) = device.take() {
        dev.release();
    }
    *ctx.release.lock().unwrap_or_else(|e| e.into_inner()) = None;
}

/// Apply the end-of-stream/read-failure policy for the source mode
fn handle_read_end(
    ctx: &CaptureContext,
    device: &mut Option<Box<dyn CaptureDevice>>,
    error: Option<crate::error::Error>,
) {
    if let Some(e) = &error {
        ctx.stats.read_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Source {} read failed: {}", ctx.source_id, e);
    }

    if ctx.mode == SourceMode::File {
        let Some(dev) = device.as_mut() else {
            return;
        };
        match dev.rewind() {
            Ok(()) => {
                debug!("Source {} rewound to first frame", ctx.source_id);
                ctx.stats.rewinds.fetch_add(1, Ordering::Relaxed);
                // Rewinding may replace the underlying handle
                *ctx.release.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(dev.release_handle());
            }
            Err(e) => {
                warn!("Source {} rewind failed, reopening: {}", ctx.source_id, e);
                drop_device(ctx, device);
                sleep_while_running(&ctx.running, ctx.backoff);
            }
        }
        return;
    }

    if error.is_none() {
        ctx.stats.read_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Source {} ended", ctx.source_id);
    }
    info!("Source {} reconnecting in {:?}", ctx.source_id, ctx.backoff);
    drop_device(ctx, device);
    sleep_while_running(&ctx.running, ctx.backoff);
}

fn capture_loop(ctx: CaptureContext) {
    debug!("Capture thread for source {} running", ctx.source_id);

    let mut device: Option<Box<dyn CaptureDevice>> = None;
    let mut sequence: u64 = 0;

    while ctx.running.load(Ordering::Acquire) {
        if device.is_none() {
            match ctx.backend.open(&ctx.locator, ctx.mode) {
                Ok(dev) => {
                    info!("Source {} opened ({})", ctx.source_id, ctx.locator);
                    *ctx.release.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some(dev.release_handle());
                    device = Some(dev);
                }
                Err(e) => {
                    warn!("Source {} unavailable: {}", ctx.source_id, e);
                    ctx.stats.open_failures.fetch_add(1, Ordering::Relaxed);
                    sleep_while_running(&ctx.running, ctx.backoff);
                    continue;
                }
            }
        }

        let Some(dev) = device.as_mut() else {
            continue;
        };

        match dev.read_frame() {
            Ok(Some(mut frame)) => {
                frame.timestamp_ms = chrono::Utc::now().timestamp_millis();
                frame.sequence = sequence;
                sequence += 1;
                if ctx.queue.push(frame) {
                    ctx.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                ctx.stats.captured.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => handle_read_end(&ctx, &mut device, None),
            Err(e) => handle_read_end(&ctx, &mut device, Some(e)),
        }

        sleep_while_running(&ctx.running, ctx.interval);
    }

    drop_device(&ctx, &mut device);
    debug!("Capture thread for source {} exited", ctx.source_id);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::sync::atomic::AtomicUsize;

    /// Device replaying a fixed list of single-pixel frames tagged by their first byte
    pub(crate) struct ScriptedDevice {
        frames: Vec<u8>,
        position: usize,
        released: Arc<AtomicBool>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            if self.released.load(Ordering::SeqCst) {
                return Err(Error::FrameDecode("released".into()));
            }
            match self.frames.get(self.position) {
                Some(tag) => {
                    self.position += 1;
                    Ok(Some(Frame::filled(1, 1, [*tag, 0, 0])))
                }
                None => Ok(None),
            }
        }

        fn rewind(&mut self) -> Result<()> {
            self.position = 0;
            Ok(())
        }

        fn release_handle(&self) -> ReleaseHandle {
            let released = Arc::clone(&self.released);
            ReleaseHandle::new(move || released.store(true, Ordering::SeqCst))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Backend that fails the first `failures` opens
    pub(crate) struct ScriptedBackend {
        pub frames: Vec<u8>,
        pub failures: usize,
        pub opens: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(frames: Vec<u8>) -> Self {
            Self {
                frames,
                failures: 0,
                opens: AtomicUsize::new(0),
            }
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn open(&self, _locator: &SourceLocator, _mode: SourceMode) -> Result<Box<dyn CaptureDevice>> {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(Error::SourceUnavailable("scripted failure".into()));
            }
            Ok(Box::new(ScriptedDevice {
                frames: self.frames.clone(),
                position: 0,
                released: Arc::new(AtomicBool::new(false)),
            }))
        }
    }

    /// Device whose reads block until it is released
    struct StuckDevice {
        released: Arc<AtomicBool>,
    }

    impl CaptureDevice for StuckDevice {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !self.released.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            Err(Error::FrameDecode("released".into()))
        }

        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }

        fn release_handle(&self) -> ReleaseHandle {
            let released = Arc::clone(&self.released);
            ReleaseHandle::new(move || released.store(true, Ordering::SeqCst))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct StuckBackend {
        released: Arc<AtomicBool>,
    }

    impl CaptureBackend for StuckBackend {
        fn open(&self, _locator: &SourceLocator, _mode: SourceMode) -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(StuckDevice {
                released: Arc::clone(&self.released),
            }))
        }
    }

    pub(crate) fn fast_config() -> CaptureConfig {
        CaptureConfig {
            capture_interval_ms: 1,
            reconnect_backoff_ms: 10,
            stop_timeout_ms: 200,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_read_before_start_is_none() {
        let source = FrameSource::new(
            1,
            SourceLocator::Url("scripted".into()),
            SourceMode::File,
            Arc::new(ScriptedBackend::new(vec![1, 2, 3])),
            &fast_config(),
        );
        assert!(source.read().is_none());
        assert!(!source.is_running());
    }

    #[test]
    fn test_file_source_loops_to_first_frame() {
        let source = FrameSource::new(
            1,
            SourceLocator::Url("scripted".into()),
            SourceMode::File,
            Arc::new(ScriptedBackend::new(vec![10, 11, 12])),
            &fast_config(),
        );
        source.start().unwrap();

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Some(frame) = source.read() {
                seen.push(frame.data[0]);
                if seen.windows(2).any(|w| w == [12, 10]) {
                    break;
                }
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        source.stop();

        assert!(
            seen.windows(2).any(|w| w == [12, 10]),
            "expected wrap to first frame, saw {:?}",
            seen
        );
        assert!(source.stats().rewinds >= 1);
    }

    #[test]
    fn test_frames_are_stamped_in_order() {
        let source = FrameSource::new(
            3,
            SourceLocator::Url("scripted".into()),
            SourceMode::File,
            Arc::new(ScriptedBackend::new(vec![1, 2, 3, 4])),
            &fast_config(),
        );
        source.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        let mut last: Option<u64> = None;
        while let Some(frame) = source.read() {
            assert!(frame.timestamp_ms > 0);
            if let Some(prev) = last {
                assert!(frame.sequence > prev);
            }
            last = Some(frame.sequence);
        }
        source.stop();
        assert!(last.is_some());
    }

    #[test]
    fn test_live_source_retries_failed_open() {
        let backend = Arc::new(ScriptedBackend {
            frames: vec![7],
            failures: 3,
            opens: AtomicUsize::new(0),
        });
        let source = FrameSource::new(
            2,
            SourceLocator::Url("rtsp://scripted".into()),
            SourceMode::Live,
            backend.clone(),
            &fast_config(),
        );
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut got = None;
        while Instant::now() < deadline && got.is_none() {
            got = source.read();
            thread::sleep(Duration::from_millis(5));
        }
        source.stop();

        assert_eq!(got.map(|f| f.data[0]), Some(7));
        assert!(source.stats().open_failures >= 3);
        // A single-frame live stream ends, so the source keeps reconnecting
        assert!(backend.opens.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_queue_stays_bounded_without_reader() {
        let source = FrameSource::new(
            4,
            SourceLocator::Url("scripted".into()),
            SourceMode::File,
            Arc::new(ScriptedBackend::new((0..50).collect())),
            &fast_config(),
        );
        source.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(source.buffered() <= 5);
        source.stop();
        assert!(source.stats().dropped > 0);
    }

    #[test]
    fn test_stop_is_bounded_when_device_blocks() {
        let released = Arc::new(AtomicBool::new(false));
        let source = FrameSource::new(
            5,
            SourceLocator::Device(0),
            SourceMode::Live,
            Arc::new(StuckBackend {
                released: Arc::clone(&released),
            }),
            &fast_config(),
        );
        source.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        source.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(released.load(Ordering::SeqCst));
        assert!(!source.is_running());
    }

    #[test]
    fn test_start_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::new(vec![1]));
        let source = FrameSource::new(
            6,
            SourceLocator::Url("scripted".into()),
            SourceMode::File,
            backend.clone(),
            &fast_config(),
        );
        source.start().unwrap();
        source.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop();
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    }
}
