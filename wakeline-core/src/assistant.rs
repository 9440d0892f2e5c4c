//! `VoiceAssistant`: session and lifecycle manager.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceAssistant::new()                       status = Uninitialized
//!     └─► initialize()                        (a)-(e) under the lifecycle lock
//!             ├─ ok  → status = Ready, feed + detect tasks running
//!             └─ err → status = Failed (no partial mode, no retry)
//!                 └─► wait()                  blocks until a task fails or shutdown
//!                     └─► shutdown()          status = ShutDown
//! ```
//!
//! `initialize()` runs at most once. The lifecycle lock is held across the
//! whole startup sequence and across teardown, never in steady state.
//!
//! ## Threading
//!
//! The feed and detect tasks are dedicated OS threads named `feed` and
//! `detect`, pinned best-effort to the configured cores. A task that fails
//! (or panics) reports through a crossbeam channel drained by `wait()`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    actuation::CommandSink,
    audio::{AudioFormat, AudioSource},
    engine::{
        CommandModel, FrontEnd, RecognitionEngine, SessionConfig, COMMAND_PREFIX, WAKE_PREFIX,
    },
    error::{Result, WakelineError},
    events::{AssistantEvent, AssistantStatus, EventBus, EventKind},
    indicator::Indicator,
    pipeline::{
        detect, feed, DetectionState, Detector, DiagnosticsSnapshot, PipelineDiagnostics,
    },
};

/// Static configuration, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AssistantConfig {
    pub audio: AudioFormat,
    /// Model partition handed to the engine's model store.
    pub model_partition: String,
    /// Keyword selecting the wake-word model among the `wn` models.
    pub wake_model: String,
    /// Keyword selecting the command model among the `mn` models.
    pub command_language: String,
    /// Listening window after a wake word, in milliseconds.
    pub command_window_ms: u32,
    pub vad_enabled: bool,
    /// Microphone channels the engine consumes.
    pub mic_channels: usize,
    /// Playback reference channels the engine consumes.
    pub ref_channels: usize,
    /// Engine feed→fetch buffer depth, in fetch chunks.
    pub ring_chunks: usize,
    /// Core for the feed task. `None` leaves placement to the OS.
    pub feed_core: Option<usize>,
    pub detect_core: Option<usize>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            audio: AudioFormat::default(),
            model_partition: "model".into(),
            wake_model: "wn9_hiesp".into(),
            command_language: "en".into(),
            command_window_ms: 6_000,
            vad_enabled: true,
            mic_channels: 2,
            ref_channels: 0,
            ring_chunks: 50,
            feed_core: Some(0),
            detect_core: Some(1),
        }
    }
}

impl AssistantConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WakelineError::InvalidConfig(msg));

        if self.audio.sample_rate == 0 {
            return invalid("sample rate must be non-zero".into());
        }
        let bits = self.audio.bits_per_sample;
        if ![16, 24, 32].contains(&bits) {
            return invalid(format!("unsupported bits per sample: {bits}"));
        }
        let payload = self.audio.narrowing.payload_bits();
        if payload < 16 || payload > bits {
            return invalid(format!(
                "payload of {payload} bits does not fit a {bits}-bit sample"
            ));
        }
        if self.command_window_ms == 0 {
            return invalid("command window must be non-zero".into());
        }
        if self.mic_channels == 0 {
            return invalid("at least one microphone channel is required".into());
        }
        if self.ring_chunks == 0 {
            return invalid("ring must hold at least one chunk".into());
        }
        if self.wake_model.trim().is_empty() {
            return invalid("wake model keyword is empty".into());
        }
        Ok(())
    }

    /// Channels the engine session will consume.
    pub fn required_channels(&self) -> usize {
        self.mic_channels + self.ref_channels
    }
}

struct Lifecycle {
    status: AssistantStatus,
    front_end: Option<Arc<dyn FrontEnd>>,
    feed: Option<JoinHandle<()>>,
    detect: Option<JoinHandle<()>>,
}

/// Everything startup produces before the tasks are spawned.
struct Prepared {
    front_end: Arc<dyn FrontEnd>,
    command_model: Box<dyn CommandModel>,
}

/// The voice assistant handle.
///
/// `VoiceAssistant` is `Send + Sync`. Wrap it in an `Arc` to wait on it
/// from one thread and shut it down from another.
pub struct VoiceAssistant {
    config: AssistantConfig,
    lifecycle: Mutex<Lifecycle>,
    /// `true` while the tasks should keep going.
    running: Arc<AtomicBool>,
    events: Arc<EventBus>,
    diagnostics: Arc<PipelineDiagnostics>,
    /// Last state published by the detect task.
    detection: Arc<Mutex<DetectionState>>,
    /// `Some` carries a fatal task error, `None` marks shutdown.
    exit_tx: Sender<Option<WakelineError>>,
    exit_rx: Receiver<Option<WakelineError>>,
}

impl VoiceAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        let (exit_tx, exit_rx) = unbounded();
        Self {
            config,
            lifecycle: Mutex::new(Lifecycle {
                status: AssistantStatus::Uninitialized,
                front_end: None,
                feed: None,
                detect: None,
            }),
            running: Arc::new(AtomicBool::new(false)),
            events: Arc::new(EventBus::new()),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            detection: Arc::new(Mutex::new(DetectionState::Armed)),
            exit_tx,
            exit_rx,
        }
    }

    /// Bring the assistant up: audio, models, session, invariants, tasks.
    ///
    /// # Errors
    /// - `AlreadyInitialized` / `InitializationFailed` / `ShutDown` when not
    ///   called from `Uninitialized`.
    /// - Any startup failure. The status becomes `Failed` and stays there.
    pub fn initialize(
        &self,
        mut audio: Box<dyn AudioSource>,
        engine: &dyn RecognitionEngine,
        indicator: Arc<dyn Indicator>,
        sink: Arc<dyn CommandSink>,
    ) -> Result<()> {
        let mut life = self.lifecycle.lock();
        match life.status {
            AssistantStatus::Uninitialized => {}
            AssistantStatus::Ready => return Err(WakelineError::AlreadyInitialized),
            AssistantStatus::Failed => return Err(WakelineError::InitializationFailed),
            AssistantStatus::ShutDown => return Err(WakelineError::ShutDown),
        }

        let started = self.config.validate().and_then(|()| {
            // ── (a) Audio source ──
            audio.init(&self.config.audio)?;
            info!(
                sample_rate = self.config.audio.sample_rate,
                channels = audio.channel_count(),
                bits = self.config.audio.bits_per_sample,
                "audio source ready"
            );

            let prepared = match self.prepare(audio.as_ref(), engine) {
                Ok(prepared) => prepared,
                Err(e) => {
                    if let Err(te) = audio.teardown() {
                        warn!("audio teardown after failed startup: {te}");
                    }
                    return Err(e);
                }
            };

            // ── (e) Tasks ──
            self.spawn_tasks(&mut life, audio, prepared, indicator, sink)
        });

        match started {
            Ok(()) => {
                self.set_status(&mut life, AssistantStatus::Ready, None);
                info!("voice assistant ready");
                Ok(())
            }
            Err(e) => {
                error!("voice assistant startup failed: {e}");
                self.set_status(&mut life, AssistantStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Steps (b)-(d). Closes the session again if a later step fails.
    fn prepare(
        &self,
        audio: &dyn AudioSource,
        engine: &dyn RecognitionEngine,
    ) -> Result<Prepared> {
        // ── (b) Models ──
        let models = engine.load_models(&self.config.model_partition)?;
        info!(
            partition = %self.config.model_partition,
            count = models.len(),
            "models loaded"
        );
        models.log_inventory();
        let wake_model = models.require(WAKE_PREFIX, &self.config.wake_model)?;
        let command_name = models.require(COMMAND_PREFIX, &self.config.command_language)?;
        info!(wake = wake_model, command = command_name, "models selected");

        // ── (c) Session ──
        let available = audio.channel_count();
        let required = self.config.required_channels();
        if required > available {
            return Err(WakelineError::ChannelMismatch {
                required,
                available,
            });
        }
        let session = SessionConfig {
            wake_enabled: true,
            vad_enabled: self.config.vad_enabled,
            wake_model: wake_model.to_string(),
            sample_rate: self.config.audio.sample_rate,
            total_channels: available,
            mic_channels: self.config.mic_channels,
            ref_channels: self.config.ref_channels,
            ring_chunks: self.config.ring_chunks,
        };
        let front_end = engine.create_session(&session)?;

        let checked = engine
            .create_command_model(command_name, self.config.command_window_ms)
            .and_then(|command_model| {
                // ── (d) Invariants ──
                let required = front_end.channel_count();
                if required > available {
                    return Err(WakelineError::ChannelMismatch {
                        required,
                        available,
                    });
                }
                let fetch = front_end.fetch_chunk_size();
                let command = command_model.sample_chunk_size();
                if command != fetch {
                    return Err(WakelineError::ChunkSizeMismatch { command, fetch });
                }
                info!(
                    feed_chunk = front_end.feed_chunk_size(),
                    fetch_chunk = fetch,
                    channels = required,
                    window_ms = self.config.command_window_ms,
                    "session created"
                );
                Ok(command_model)
            });

        match checked {
            Ok(command_model) => Ok(Prepared {
                front_end,
                command_model,
            }),
            Err(e) => {
                front_end.close();
                Err(e)
            }
        }
    }

    fn spawn_tasks(
        &self,
        life: &mut Lifecycle,
        audio: Box<dyn AudioSource>,
        prepared: Prepared,
        indicator: Arc<dyn Indicator>,
        sink: Arc<dyn CommandSink>,
    ) -> Result<()> {
        let Prepared {
            front_end,
            command_model,
        } = prepared;

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let feed_ctx = feed::FeedContext {
            audio,
            front_end: Arc::clone(&front_end),
            running: Arc::clone(&self.running),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let feed_handle = match self.spawn_task("feed", self.config.feed_core, move || {
            feed::run(feed_ctx)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                front_end.close();
                return Err(e);
            }
        };

        let detector = Detector::new(
            Arc::clone(&front_end),
            command_model,
            indicator,
            sink,
            Arc::clone(&self.events),
            Arc::clone(&self.diagnostics),
            Arc::clone(&self.detection),
        );
        let running = Arc::clone(&self.running);
        let detect_handle = match self.spawn_task("detect", self.config.detect_core, move || {
            detect::run(detector, running)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                front_end.close();
                join_task("feed", feed_handle);
                return Err(e);
            }
        };

        life.front_end = Some(front_end);
        life.feed = Some(feed_handle);
        life.detect = Some(detect_handle);
        Ok(())
    }

    fn spawn_task<F>(
        &self,
        task: &'static str,
        core: Option<usize>,
        body: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let exit_tx = self.exit_tx.clone();
        std::thread::Builder::new()
            .name(task.into())
            .spawn(move || {
                let _reporter = PanicReporter {
                    task,
                    exit_tx: exit_tx.clone(),
                };
                if let Some(core) = core {
                    pin_current_thread(task, core);
                }
                if let Err(e) = body() {
                    error!(task, "task halted: {e}");
                    let _ = exit_tx.send(Some(e));
                }
            })
            .map_err(|e| WakelineError::TaskSpawn {
                task,
                reason: e.to_string(),
            })
    }

    /// Block until a task fails (`Err`) or the assistant is shut down (`Ok`).
    ///
    /// # Errors
    /// - `NotRunning` if `initialize()` never succeeded.
    /// - The first fatal runtime error of either task.
    pub fn wait(&self) -> Result<()> {
        match self.status() {
            AssistantStatus::Ready | AssistantStatus::ShutDown => {}
            AssistantStatus::Uninitialized | AssistantStatus::Failed => {
                return Err(WakelineError::NotRunning)
            }
        }
        match self.exit_rx.recv() {
            Ok(Some(e)) => Err(e),
            Ok(None) | Err(_) => Ok(()),
        }
    }

    /// Stop both tasks, close the session and release the audio source.
    ///
    /// # Errors
    /// - `NotRunning` if already shut down.
    pub fn shutdown(&self) -> Result<()> {
        let mut life = self.lifecycle.lock();
        if life.status == AssistantStatus::ShutDown {
            return Err(WakelineError::NotRunning);
        }

        info!("voice assistant shutdown requested");
        self.running.store(false, Ordering::SeqCst);
        if let Some(front_end) = life.front_end.take() {
            front_end.close();
        }
        if let Some(handle) = life.feed.take() {
            join_task("feed", handle);
        }
        if let Some(handle) = life.detect.take() {
            join_task("detect", handle);
        }

        self.set_status(&mut life, AssistantStatus::ShutDown, None);
        let _ = self.exit_tx.send(None);
        info!("voice assistant shut down");
        Ok(())
    }

    pub fn status(&self) -> AssistantStatus {
        self.lifecycle.lock().status
    }

    /// Last detection state published by the detect task.
    pub fn detection_state(&self) -> DetectionState {
        *self.detection.lock()
    }

    /// Configuration fixed at construction.
    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AssistantEvent> {
        self.events.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, life: &mut Lifecycle, status: AssistantStatus, detail: Option<String>) {
        life.status = status;
        self.events.emit(EventKind::Status { status, detail });
    }
}

impl Drop for VoiceAssistant {
    fn drop(&mut self) {
        if self.status() == AssistantStatus::Ready {
            let _ = self.shutdown();
        }
    }
}

/// Reports a panicking task as dead instead of leaving `wait()` blocked.
struct PanicReporter {
    task: &'static str,
    exit_tx: Sender<Option<WakelineError>>,
}

impl Drop for PanicReporter {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(task = self.task, "task panicked");
            let _ = self
                .exit_tx
                .send(Some(WakelineError::TaskDied { task: self.task }));
        }
    }
}

fn join_task(task: &'static str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(task, "task panicked before shutdown");
    }
}

fn pin_current_thread(task: &'static str, core: usize) {
    let target = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match target {
        Some(id) if core_affinity::set_for_current(id) => info!(task, core, "task pinned"),
        Some(_) => warn!(task, core, "failed to pin task, running unpinned"),
        None => warn!(task, core, "core not available, running unpinned"),
    }
}
