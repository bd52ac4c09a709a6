//! Pipeline manager
//!
//! Registry of running workers keyed by source id, at most one per source. Owns the model
//! registry shared by all workers and one acknowledgement polling loop per distinct bot
//! token, started lazily by the first pipeline that resolves to that token.

use super::artifacts::ArtifactWriter;
use super::worker::{PipelineWorker, WorkerServices};
use crate::capture::{CaptureBackend, FrameSource, SourceLocator, SourceMode};
use crate::config::TomlConfig;
use crate::detection::{FallDetector, ModelRegistry, OracleLoader};
use crate::error::{Error, Result};
use crate::notify::{resolve_credentials, spawn_poller, Notifier, NotifierFactory, PollSettings};
use crate::store::EventStore;
use fallguard_common::config::BotCredentials;
use fallguard_common::db::{Group, VideoSource};
use fallguard_common::events::FallguardEvent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop_all` waits for polling loops after tripping shutdown
const POLLER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub source: VideoSource,
    pub group: Option<Group>,
    /// Per-request credentials, highest priority in the cascade
    pub credentials: Option<BotCredentials>,
    /// Overrides the configured model id
    pub model_id: Option<String>,
    /// Overrides the configured night-mode default
    pub night_mode: Option<bool>,
}

impl PipelineSpec {
    pub fn new(source: VideoSource, group: Option<Group>) -> Self {
        Self {
            source,
            group,
            credentials: None,
            model_id: None,
            night_mode: None,
        }
    }
}

/// Long-lived collaborators handed to the manager
#[derive(Clone)]
pub struct ManagerServices {
    pub loader: Arc<dyn OracleLoader>,
    pub backend: Arc<dyn CaptureBackend>,
    pub store: Arc<dyn EventStore>,
    pub notifiers: Arc<dyn NotifierFactory>,
    pub events: broadcast::Sender<FallguardEvent>,
    /// Process-wide shutdown, observed by reminder and polling loops
    pub shutdown: CancellationToken,
    pub rt_handle: Handle,
}

pub struct PipelineManager {
    workers: Mutex<HashMap<i64, Arc<PipelineWorker>>>,
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
    models: ModelRegistry,
    config: TomlConfig,
    artifacts: ArtifactWriter,
    services: ManagerServices,
}

impl PipelineManager {
    pub fn new(config: TomlConfig, snapshot_dir: PathBuf, services: ManagerServices) -> Self {
        let artifacts = ArtifactWriter::new(
            snapshot_dir,
            config.capture.ffmpeg_path.clone(),
            config.clip.fps,
        );
        Self {
            workers: Mutex::new(HashMap::new()),
            pollers: Mutex::new(HashMap::new()),
            models: ModelRegistry::new(Arc::clone(&services.loader)),
            config,
            artifacts,
            services,
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Start a pipeline for `spec.source`
    ///
    /// Returns `false` without side effects when the source already has a worker.
    pub fn start(&self, spec: PipelineSpec) -> Result<bool> {
        let source_id = spec.source.id;
        if self.get(source_id).is_some() {
            return Ok(false);
        }

        let worker = Arc::new(self.build_worker(spec)?);
        {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            if workers.contains_key(&source_id) {
                return Ok(false);
            }
            workers.insert(source_id, Arc::clone(&worker));
        }

        if let Err(e) = worker.start() {
            self.workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&source_id);
            return Err(e);
        }

        let _ = self.services.events.send(FallguardEvent::PipelineStarted {
            source_id,
            timestamp: chrono::Utc::now(),
        });
        Ok(true)
    }

    fn build_worker(&self, spec: PipelineSpec) -> Result<PipelineWorker> {
        let source = &spec.source;
        let model_id = spec
            .model_id
            .clone()
            .unwrap_or_else(|| self.config.model.model_id.clone());
        let oracle = self.models.get(&model_id)?;

        let notifier = self.notifier_for(&spec);
        let detection = &self.config.detection;
        let detector = FallDetector::new(
            source.id.to_string(),
            oracle,
            detection.thresholds.clone(),
            detection.inference_stride,
            spec.night_mode.unwrap_or(detection.night_mode),
            &self.config.clip,
        );

        let frame_source = FrameSource::new(
            source.id,
            SourceLocator::parse(&source.source_url),
            SourceMode::from(source.kind),
            Arc::clone(&self.services.backend),
            &self.config.capture,
        );

        let services = WorkerServices {
            store: Arc::clone(&self.services.store),
            notifier,
            artifacts: self.artifacts.clone(),
            events: self.services.events.clone(),
            rt_handle: self.services.rt_handle.clone(),
            reminder_interval: self.config.notify.reminder_interval(),
            jpeg_quality: self.config.model.jpeg_quality,
        };

        Ok(PipelineWorker::new(
            source.id,
            source.name.clone(),
            frame_source,
            detector,
            services,
            self.services.shutdown.child_token(),
        ))
    }

    /// Resolve credentials and build a notifier, starting the bot's poller if needed
    fn notifier_for(&self, spec: &PipelineSpec) -> Option<Arc<dyn Notifier>> {
        let source_id = spec.source.id;
        let Some((credentials, provider)) = resolve_credentials(
            spec.credentials.clone(),
            spec.group.as_ref(),
            &self.config.notify,
        ) else {
            warn!("No notification credentials for source {}, alerts disabled", source_id);
            return None;
        };

        let notifier = match self.services.notifiers.create(&credentials) {
            Ok(notifier) => notifier,
            Err(e) => {
                warn!("Notifier for source {} unavailable: {}", source_id, e);
                return None;
            }
        };
        info!(
            "Source {} notifies chat {} via bot {} ({})",
            source_id,
            credentials.chat_id,
            credentials.redacted_token(),
            provider
        );

        self.ensure_poller(&credentials, Arc::clone(&notifier));
        Some(notifier)
    }

    fn ensure_poller(&self, credentials: &BotCredentials, notifier: Arc<dyn Notifier>) {
        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = pollers.get(&credentials.bot_token) {
            if !existing.is_finished() {
                return;
            }
        }
        if self.services.shutdown.is_cancelled() {
            return;
        }

        let handle = spawn_poller(
            &self.services.rt_handle,
            notifier,
            Arc::clone(&self.services.store),
            self.services.events.clone(),
            PollSettings {
                timeout: self.config.notify.poll_timeout(),
                backoff: self.config.notify.poll_backoff(),
            },
            self.services.shutdown.clone(),
        );
        pollers.insert(credentials.bot_token.clone(), handle);
    }

    /// Stop and remove a pipeline; `false` if none was running
    pub async fn stop(&self, source_id: i64) -> bool {
        let worker = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&source_id);
        let Some(worker) = worker else {
            return false;
        };

        self.stop_worker(worker).await;
        true
    }

    async fn stop_worker(&self, worker: Arc<PipelineWorker>) {
        let source_id = worker.source_id();
        if let Err(e) = tokio::task::spawn_blocking(move || worker.stop()).await {
            warn!("Stopping source {} failed: {}", source_id, e);
        }
        let _ = self.services.events.send(FallguardEvent::PipelineStopped {
            source_id,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Trip process shutdown and stop every pipeline and polling loop
    pub async fn stop_all(&self) {
        self.services.shutdown.cancel();

        let workers: Vec<Arc<PipelineWorker>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        info!("Stopping {} pipelines", workers.len());
        futures::future::join_all(workers.into_iter().map(|w| self.stop_worker(w))).await;

        let pollers: Vec<JoinHandle<()>> = self
            .pollers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in pollers {
            if tokio::time::timeout(POLLER_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Polling loop did not stop within {:?}", POLLER_SHUTDOWN_TIMEOUT);
            }
        }
    }

    pub fn get(&self, source_id: i64) -> Option<Arc<PipelineWorker>> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source_id)
            .cloned()
    }

    /// Running source ids, ascending
    pub fn active_sources(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Polling loops still running
    pub fn poller_count(&self) -> usize {
        self.pollers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Switch night mode on a running pipeline
    pub fn set_night_mode(&self, source_id: i64, enabled: bool) -> Result<()> {
        let worker = self.get(source_id).ok_or_else(|| {
            Error::Common(fallguard_common::Error::NotFound(format!(
                "pipeline for source {}",
                source_id
            )))
        })?;
        worker.set_night_mode(enabled);
        Ok(())
    }
}
