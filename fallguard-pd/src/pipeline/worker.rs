//! Pipeline worker: one per running source
//!
//! A dedicated OS thread pulls frames from the source queue, runs the detector and publishes
//! the latest annotated result. Confirmed falls fan out from that thread:
//! - snapshot JPEG to disk
//! - event row through `block_on` on the shared runtime
//! - notification hand-off via `spawn` (reminders owned by this worker)
//! - `FallConfirmed` on the system event channel
//!
//! Completed clips are encoded on the blocking pool and attached to their event.

use super::artifacts::ArtifactWriter;
use crate::capture::source::join_with_timeout;
use crate::capture::{CaptureStatsSnapshot, Frame, FrameSource};
use crate::detection::{CompletedClip, DetectedFall, DetectorOutput, FallDetector, TrackView};
use crate::error::{Error, Result};
use crate::notify::{deliver_clip, spawn_alert, AlertContext, FallAlert, Notifier};
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use fallguard_common::db::NewFallEvent;
use fallguard_common::events::FallguardEvent;
use fallguard_common::time::from_unix_seconds;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sleep when the source queue is empty
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Bound on waiting for the worker thread in `stop()`
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Latest published detector result; replaced wholesale on every frame
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub source_id: i64,
    /// Annotated frame
    #[serde(skip)]
    pub frame: Option<Arc<Frame>>,
    pub frame_sequence: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub tracks: Vec<TrackView>,
    /// Falls confirmed on this frame
    pub falls: Vec<DetectedFall>,
    pub inferred: bool,
    pub frames_processed: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shared services a worker dispatches to
#[derive(Clone)]
pub struct WorkerServices {
    pub store: Arc<dyn EventStore>,
    /// `None` when no notification credentials resolved for this source
    pub notifier: Option<Arc<dyn Notifier>>,
    pub artifacts: ArtifactWriter,
    pub events: broadcast::Sender<FallguardEvent>,
    pub rt_handle: Handle,
    pub reminder_interval: Duration,
    pub jpeg_quality: u8,
}

/// Worker status for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub source_id: i64,
    pub source_name: String,
    pub locator: String,
    pub running: bool,
    pub night_mode: bool,
    pub frames_processed: u64,
    pub active_reminders: usize,
    pub notifications: bool,
    pub capture: CaptureStatsSnapshot,
}

/// State the loop thread owns or shares with the handle
struct LoopContext {
    source_id: i64,
    source_name: String,
    source: Arc<FrameSource>,
    running: Arc<AtomicBool>,
    latest: Arc<watch::Sender<Arc<PipelineSnapshot>>>,
    frames_processed: Arc<AtomicU64>,
    services: WorkerServices,
    reminders: CancellationToken,
    reminder_tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    pending_clips: PendingClips,
}

/// Events waiting for their clip, keyed by `(track, confirmation time bits)`
///
/// Nothing is retained when clip recording is off, since no clip would ever claim it.
#[derive(Debug)]
struct PendingClips {
    enabled: bool,
    events: HashMap<(i64, u64), i64>,
}

impl PendingClips {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: HashMap::new(),
        }
    }

    fn register(&mut self, track_id: i64, timestamp: f64, event_id: i64) {
        if self.enabled {
            self.events.insert((track_id, timestamp.to_bits()), event_id);
        }
    }

    fn take(&mut self, track_id: i64, timestamp: f64) -> Option<i64> {
        self.events.remove(&(track_id, timestamp.to_bits()))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.events.len()
    }
}

pub struct PipelineWorker {
    source_id: i64,
    source_name: String,
    source: Arc<FrameSource>,
    detector: Mutex<Option<FallDetector>>,
    night_mode: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    latest: Arc<watch::Sender<Arc<PipelineSnapshot>>>,
    latest_rx: watch::Receiver<Arc<PipelineSnapshot>>,
    frames_processed: Arc<AtomicU64>,
    services: WorkerServices,
    reminders: CancellationToken,
    reminder_tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl PipelineWorker {
    /// `reminders` should be a child of the process shutdown token
    pub fn new(
        source_id: i64,
        source_name: impl Into<String>,
        source: FrameSource,
        detector: FallDetector,
        services: WorkerServices,
        reminders: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(Arc::new(PipelineSnapshot {
            source_id,
            ..PipelineSnapshot::default()
        }));

        Self {
            source_id,
            source_name: source_name.into(),
            source: Arc::new(source),
            night_mode: detector.night_mode_flag(),
            detector: Mutex::new(Some(detector)),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            latest: Arc::new(tx),
            latest_rx: rx,
            frames_processed: Arc::new(AtomicU64::new(0)),
            services,
            reminders,
            reminder_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start capture and the worker thread
    ///
    /// A worker runs once; starting a stopped worker is an error.
    pub fn start(&self) -> Result<()> {
        let detector = self
            .detector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                Error::Internal(format!("worker for source {} already started", self.source_id))
            })?;

        self.running.store(true, Ordering::Release);
        if let Err(e) = self.source.start() {
            self.running.store(false, Ordering::Release);
            return Err(e);
        }

        let ctx = LoopContext {
            source_id: self.source_id,
            source_name: self.source_name.clone(),
            source: Arc::clone(&self.source),
            running: Arc::clone(&self.running),
            latest: Arc::clone(&self.latest),
            frames_processed: Arc::clone(&self.frames_processed),
            services: self.services.clone(),
            reminders: self.reminders.clone(),
            reminder_tasks: Arc::clone(&self.reminder_tasks),
            pending_clips: PendingClips::new(detector.clips_enabled()),
        };

        let spawned = thread::Builder::new()
            .name(format!("pipeline-{}", self.source_id))
            .spawn(move || worker_loop(detector, ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.source.stop();
                return Err(Error::Internal(format!("failed to spawn worker thread: {}", e)));
            }
        };

        *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Pipeline worker started for source {} ({})", self.source_id, self.source_name);
        Ok(())
    }

    /// Stop the worker thread (bounded wait), the source and every reminder this worker owns
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if !join_with_timeout(handle, STOP_TIMEOUT) {
                warn!(
                    "Worker thread for source {} did not exit within {:?}, detaching",
                    self.source_id, STOP_TIMEOUT
                );
            }
        }

        self.source.stop();
        self.reminders.cancel();
        info!("Pipeline worker stopped for source {}", self.source_id);
    }

    /// Latest published snapshot; never blocks on the worker
    pub fn latest(&self) -> Arc<PipelineSnapshot> {
        Arc::clone(&self.latest_rx.borrow())
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<PipelineSnapshot>> {
        self.latest.subscribe()
    }

    pub fn set_night_mode(&self, enabled: bool) {
        self.night_mode.store(enabled, Ordering::Relaxed);
        info!("Night mode for source {} set to {}", self.source_id, enabled);
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode.load(Ordering::Relaxed)
    }

    /// Reminder tasks still running
    pub fn active_reminders(&self) -> usize {
        let mut tasks = self.reminder_tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            source_id: self.source_id,
            source_name: self.source_name.clone(),
            locator: self.source.locator().to_string(),
            running: self.is_running(),
            night_mode: self.night_mode(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            active_reminders: self.active_reminders(),
            notifications: self.services.notifier.is_some(),
            capture: self.source.stats(),
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn worker_loop(mut detector: FallDetector, mut ctx: LoopContext) {
    debug!("Worker thread for source {} running", ctx.source_id);

    while ctx.running.load(Ordering::Acquire) {
        let Some(frame) = ctx.source.read() else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };

        match detector.process(Arc::new(frame)) {
            Ok(output) => handle_output(&mut ctx, output),
            Err(e) => {
                warn!("Detection failed on source {}: {}", ctx.source_id, e);
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    debug!("Worker thread for source {} exited", ctx.source_id);
}

fn handle_output(ctx: &mut LoopContext, output: DetectorOutput) {
    let frames_processed = ctx.frames_processed.fetch_add(1, Ordering::Relaxed) + 1;

    for fall in &output.falls {
        handle_fall(ctx, &output.annotated, fall);
    }
    for clip in output.completed_clips {
        handle_clip(ctx, clip);
    }

    let annotated = Arc::new(output.annotated);
    ctx.latest.send_replace(Arc::new(PipelineSnapshot {
        source_id: ctx.source_id,
        frame_sequence: Some(annotated.sequence),
        width: annotated.width,
        height: annotated.height,
        frame: Some(annotated),
        tracks: output.tracks,
        falls: output.falls,
        inferred: output.inferred,
        frames_processed,
        updated_at: Some(Utc::now()),
    }));
}

fn handle_fall(ctx: &mut LoopContext, annotated: &Frame, fall: &DetectedFall) {
    let services = &ctx.services;
    let timestamp = from_unix_seconds(fall.timestamp);

    let jpeg = match annotated.encode_jpeg(services.jpeg_quality) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            error!("Failed to encode snapshot for source {}: {}", ctx.source_id, e);
            None
        }
    };

    let snapshot_path = jpeg.as_deref().and_then(|bytes| {
        match services
            .artifacts
            .write_snapshot(ctx.source_id, timestamp.timestamp(), fall.track_id, bytes)
        {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                error!("Failed to write snapshot for source {}: {}", ctx.source_id, e);
                None
            }
        }
    });

    let new_event = NewFallEvent {
        source_id: ctx.source_id,
        track_id: fall.track_id,
        score: fall.fall_score as f64,
        reason: fall.reason.clone(),
        timestamp,
        snapshot_path,
    };

    let store = Arc::clone(&services.store);
    let event_id = match services
        .rt_handle
        .block_on(async move { store.save_event(&new_event).await })
    {
        Ok(id) => id,
        Err(e) => {
            error!(
                "Failed to persist fall on source {} track {}: {}",
                ctx.source_id, fall.track_id, e
            );
            return;
        }
    };

    info!(
        "Fall event {} recorded for source {} track {} (score {:.2})",
        event_id, ctx.source_id, fall.track_id, fall.fall_score
    );
    ctx.pending_clips.register(fall.track_id, fall.timestamp, event_id);

    let _ = services.events.send(FallguardEvent::FallConfirmed {
        event_id,
        source_id: ctx.source_id,
        track_id: fall.track_id,
        score: fall.fall_score as f64,
        reason: fall.reason.clone(),
        timestamp,
    });

    let Some(notifier) = &services.notifier else {
        return;
    };
    let alert = FallAlert {
        event_id,
        source_id: ctx.source_id,
        source_name: ctx.source_name.clone(),
        track_id: fall.track_id,
        score: fall.fall_score as f64,
        reason: fall.reason.clone(),
        timestamp,
        snapshot: jpeg.unwrap_or_default(),
    };
    let task = spawn_alert(
        &services.rt_handle,
        AlertContext {
            notifier: Arc::clone(notifier),
            store: Arc::clone(&services.store),
            reminder_interval: services.reminder_interval,
        },
        alert,
        ctx.reminders.child_token(),
    );

    let mut tasks = ctx.reminder_tasks.lock().unwrap_or_else(|e| e.into_inner());
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}

fn handle_clip(ctx: &mut LoopContext, clip: CompletedClip) {
    let Some(event_id) = ctx.pending_clips.take(clip.track_id, clip.timestamp) else {
        debug!(
            "Clip for track {} on source {} has no recorded event, discarding",
            clip.track_id, ctx.source_id
        );
        return;
    };

    let source_id = ctx.source_id;
    let writer = ctx.services.artifacts.clone();
    let store = Arc::clone(&ctx.services.store);
    let notifier = ctx.services.notifier.clone();

    ctx.services.rt_handle.spawn(async move {
        let encoded = tokio::task::spawn_blocking(move || writer.encode_clip(source_id, &clip)).await;
        let path = match encoded {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                error!("Failed to encode clip for event {}: {}", event_id, e);
                return;
            }
            Err(e) => {
                error!("Clip encoder task for event {} failed: {}", event_id, e);
                return;
            }
        };

        let delivered = match notifier {
            Some(notifier) => deliver_clip(notifier.as_ref(), store.as_ref(), event_id, &path).await,
            None => store
                .set_clip_path(event_id, &path.to_string_lossy())
                .await,
        };
        if let Err(e) = delivered {
            warn!("Failed to attach clip to event {}: {}", event_id, e);
        }
    });
}
