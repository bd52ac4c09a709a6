//! Shared fakes for fallguard-pd integration tests
//!
//! - a capture backend producing small frames forever
//! - a pose oracle reporting one lying, collapsed person on every frame
//! - a notifier factory handing out one recording notifier per bot token

#![allow(dead_code)]

use async_trait::async_trait;
use fallguard_common::config::BotCredentials;
use fallguard_common::db::{init_memory_database, Group, SourceKind, VideoSource};
use fallguard_pd::capture::{CaptureBackend, CaptureDevice, Frame, ReleaseHandle, SourceLocator, SourceMode};
use fallguard_pd::config::TomlConfig;
use fallguard_pd::detection::pose::{KEYPOINT_COUNT, LEFT_HIP, LEFT_SHOULDER, NOSE, RIGHT_HIP, RIGHT_SHOULDER};
use fallguard_pd::detection::{BBox, Detection, Keypoint, OracleLoader, PoseOracle};
use fallguard_pd::notify::{ActionPress, Notifier, NotifierFactory, Update};
use fallguard_pd::pipeline::{ManagerServices, PipelineManager};
use fallguard_pd::store::SqliteEventStore;
use fallguard_pd::{Result, SharedState};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

// ============================================================================
// Capture
// ============================================================================

struct LoopingDevice;

impl CaptureDevice for LoopingDevice {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(Some(Frame::filled(32, 24, [40, 40, 40])))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }

    fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle::noop()
    }

    fn release(&mut self) {}
}

#[derive(Default)]
pub struct LoopingBackend {
    pub opens: AtomicUsize,
}

impl CaptureBackend for LoopingBackend {
    fn open(&self, _locator: &SourceLocator, _mode: SourceMode) -> Result<Box<dyn CaptureDevice>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopingDevice))
    }
}

// ============================================================================
// Pose oracle
// ============================================================================

/// Person lying across a 32x24 frame with the head at floor level
pub fn fallen_person(track_id: i64) -> Detection {
    let bbox = BBox::new(16.0, 12.0, 18.0, 10.0);
    let mut keypoints = vec![Keypoint::default(); KEYPOINT_COUNT];
    keypoints[LEFT_HIP] = Keypoint::new(10.0, 13.0, 0.9);
    keypoints[RIGHT_HIP] = Keypoint::new(10.0, 14.0, 0.9);
    keypoints[LEFT_SHOULDER] = Keypoint::new(22.0, 13.0, 0.9);
    keypoints[RIGHT_SHOULDER] = Keypoint::new(22.0, 14.0, 0.9);
    keypoints[NOSE] = Keypoint::new(24.0, bbox.bottom() - 1.0, 0.9);

    Detection {
        track_id,
        bbox,
        keypoints,
        confidence: 0.9,
    }
}

pub struct FallenOracle {
    model_id: String,
}

impl PoseOracle for FallenOracle {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn detect(&self, _stream_key: &str, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(vec![fallen_person(1)])
    }
}

#[derive(Default)]
pub struct CountingLoader {
    pub loads: AtomicUsize,
}

impl OracleLoader for CountingLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn PoseOracle>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FallenOracle {
            model_id: model_id.to_string(),
        }))
    }
}

// ============================================================================
// Notification
// ============================================================================

pub struct FakeNotifier {
    key: String,
    pub alerts: Mutex<Vec<String>>,
    pub reminders: Mutex<Vec<String>>,
    pub edits: Mutex<Vec<(String, String)>>,
    pub acks: Mutex<Vec<Option<String>>>,
    pub polls: AtomicUsize,
    updates: Mutex<VecDeque<Update>>,
    next_update_id: AtomicUsize,
}

impl FakeNotifier {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            alerts: Mutex::new(Vec::new()),
            reminders: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            updates: Mutex::new(VecDeque::new()),
            next_update_id: AtomicUsize::new(100),
        }
    }

    /// Queue a button press to be returned by the next poll
    pub fn press(&self, data: &str, responder: &str) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::SeqCst) as i64;
        self.updates.lock().unwrap().push_back(Update {
            update_id,
            action: Some(ActionPress {
                action_id: format!("cb-{}", update_id),
                data: data.to_string(),
                responder_name: responder.to_string(),
                responder_id: format!("{}-id", responder),
            }),
        });
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn credential_key(&self) -> &str {
        &self.key
    }

    async fn send_alert(&self, _image: Vec<u8>, _caption: &str, action_ref: &str) -> Result<Option<String>> {
        let mut alerts = self.alerts.lock().unwrap();
        alerts.push(action_ref.to_string());
        Ok(Some(format!("-100:{}", alerts.len())))
    }

    async fn send_reminder(&self, text: &str) -> Result<()> {
        self.reminders.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_clip(&self, _path: &Path, _caption: &str) -> Result<()> {
        Ok(())
    }

    async fn edit_caption(&self, message_ref: &str, text: &str) -> Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push((message_ref.to_string(), text.to_string()));
        Ok(())
    }

    async fn poll_updates(&self, _offset: i64, _timeout: Duration) -> Result<Vec<Update>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<Update> = self.updates.lock().unwrap().drain(..).collect();
        if pending.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(pending)
    }

    async fn ack_action(&self, _action_id: &str, text: Option<&str>) -> Result<()> {
        self.acks.lock().unwrap().push(text.map(str::to_string));
        Ok(())
    }
}

/// Hands out one shared notifier per bot token
#[derive(Default)]
pub struct FakeFactory {
    notifiers: Mutex<HashMap<String, Arc<FakeNotifier>>>,
    pub created: AtomicUsize,
}

impl FakeFactory {
    pub fn notifier(&self, bot_token: &str) -> Option<Arc<FakeNotifier>> {
        self.notifiers.lock().unwrap().get(bot_token).cloned()
    }
}

impl NotifierFactory for FakeFactory {
    fn create(&self, credentials: &BotCredentials) -> Result<Arc<dyn Notifier>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let notifier = self
            .notifiers
            .lock()
            .unwrap()
            .entry(credentials.bot_token.clone())
            .or_insert_with(|| Arc::new(FakeNotifier::new(&credentials.redacted_token())))
            .clone();
        Ok(notifier)
    }
}

// ============================================================================
// Manager
// ============================================================================

pub fn video_source(id: i64, group_id: Option<i64>) -> VideoSource {
    VideoSource {
        id,
        name: format!("camera-{}", id),
        source_url: format!("/videos/camera-{}.mp4", id),
        kind: SourceKind::File,
        group_id,
        is_active: true,
    }
}

pub fn group(id: i64, bot_token: &str, chat_id: &str) -> Group {
    Group {
        id,
        name: format!("group-{}", id),
        chat_id: Some(chat_id.to_string()),
        bot_token: Some(bot_token.to_string()),
    }
}

pub struct TestHarness {
    pub state: Arc<SharedState>,
    pub manager: Arc<PipelineManager>,
    pub store: Arc<SqliteEventStore>,
    pub loader: Arc<CountingLoader>,
    pub backend: Arc<LoopingBackend>,
    pub factory: Arc<FakeFactory>,
    pub snapshot_dir: PathBuf,
    _dir: tempfile::TempDir,
}

/// Config with fast capture, quick confirmation and short reminder/poll timings
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.capture.capture_interval_ms = 5;
    config.capture.reconnect_backoff_ms = 20;
    config.capture.stop_timeout_ms = 500;
    config.detection.inference_stride = 1;
    config.detection.thresholds.confirm_secs = 0.2;
    config.detection.thresholds.cooldown_secs = 60.0;
    config.notify.reminder_interval_secs = 1;
    config.notify.poll_timeout_secs = 1;
    config.notify.poll_backoff_secs = 1;
    config.clip.enabled = false;
    config
}

pub async fn harness(config: TomlConfig) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_dir = dir.path().join("snapshots");
    let state = Arc::new(SharedState::new());
    let store = Arc::new(SqliteEventStore::new(init_memory_database().await.unwrap()));
    let loader = Arc::new(CountingLoader::default());
    let backend = Arc::new(LoopingBackend::default());
    let factory = Arc::new(FakeFactory::default());

    let manager = PipelineManager::new(
        config,
        snapshot_dir.clone(),
        ManagerServices {
            loader: loader.clone(),
            backend: backend.clone(),
            store: store.clone(),
            notifiers: factory.clone(),
            events: state.event_tx.clone(),
            shutdown: state.shutdown.clone(),
            rt_handle: Handle::current(),
        },
    );

    TestHarness {
        state,
        manager: Arc::new(manager),
        store,
        loader,
        backend,
        factory,
        snapshot_dir,
        _dir: dir,
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
