//! Scripted collaborators shared by the integration tests.
//!
//! Every fed frame is filled with its index, so the scripted front end and
//! command model can key their verdicts on "frame N" and the recorders can
//! note which frame they saw.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use wakeline_core::engine::{
    CommandModel, CommandResult, CommandState, FetchResult, FrontEnd, ModelStore,
    RecognitionEngine, SessionConfig, WakeState,
};
use wakeline_core::{
    AssistantConfig, AssistantEvent, AudioFormat, AudioSource, CommandSink, EventKind, Indicator,
    Result, WakelineError,
};

// ---------------------------------------------------------------------------
// Audio source
// ---------------------------------------------------------------------------

pub struct ScriptedAudio {
    channels: usize,
    next: usize,
    fail_at: Option<usize>,
    pace: Duration,
    pub torn_down: Arc<AtomicBool>,
}

impl ScriptedAudio {
    pub fn new() -> Self {
        Self {
            channels: 0,
            next: 0,
            fail_at: None,
            pace: Duration::from_millis(1),
            torn_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_at(frame: usize) -> Self {
        Self {
            fail_at: Some(frame),
            ..Self::new()
        }
    }
}

impl AudioSource for ScriptedAudio {
    fn init(&mut self, format: &AudioFormat) -> Result<()> {
        self.channels = format.layout.channel_count();
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        if Some(self.next) == self.fail_at {
            return Err(WakelineError::AudioRead(format!("i2s fault at frame {}", self.next)));
        }
        thread::sleep(self.pace);
        frame.fill(self.next as i16);
        self.next += 1;
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.torn_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// Recognition engine
// ---------------------------------------------------------------------------

/// Unbounded FIFO front end. `fetch` hands back frames in feed order with
/// the scripted wake verdict for that frame index.
pub struct ScriptedFrontEnd {
    chunk: usize,
    required_channels: usize,
    wake_script: HashMap<usize, WakeState>,
    queue: Mutex<VecDeque<usize>>,
    ready: Condvar,
    closed: AtomicBool,
    wake_enabled: AtomicBool,
    /// Index of the frame most recently returned by `fetch`.
    pub current: Arc<AtomicUsize>,
}

impl FrontEnd for ScriptedFrontEnd {
    fn feed_chunk_size(&self) -> usize {
        self.chunk
    }

    fn fetch_chunk_size(&self) -> usize {
        self.chunk
    }

    fn channel_count(&self) -> usize {
        self.required_channels
    }

    fn feed(&self, frame: &[i16]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WakelineError::EngineClosed);
        }
        self.queue.lock().push_back(frame[0] as usize);
        self.ready.notify_one();
        Ok(())
    }

    fn fetch(&self, frame: &mut [i16]) -> Result<FetchResult> {
        let mut queue = self.queue.lock();
        let idx = loop {
            if let Some(idx) = queue.pop_front() {
                break idx;
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(WakelineError::EngineClosed);
            }
            self.ready.wait_for(&mut queue, Duration::from_millis(10));
        };
        drop(queue);

        frame.fill(idx as i16);
        self.current.store(idx, Ordering::SeqCst);
        let wake_state = match self.wake_script.get(&idx) {
            Some(state) if self.wake_enabled.load(Ordering::SeqCst) => *state,
            _ => WakeState::NoDetect,
        };
        Ok(FetchResult {
            wake_state,
            speech: false,
        })
    }

    fn enable_wake(&self) {
        self.wake_enabled.store(true, Ordering::SeqCst);
    }

    fn disable_wake(&self) {
        self.wake_enabled.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_all();
    }
}

pub struct ScriptedCommandModel {
    chunk: usize,
    script: HashMap<usize, CommandState>,
    last_detected: Option<usize>,
}

impl CommandModel for ScriptedCommandModel {
    fn sample_chunk_size(&self) -> usize {
        self.chunk
    }

    fn reset(&mut self) {
        self.last_detected = None;
    }

    fn detect(&mut self, frame: &[i16]) -> CommandState {
        let idx = frame[0] as usize;
        let state = self
            .script
            .get(&idx)
            .copied()
            .unwrap_or(CommandState::Detecting);
        if state == CommandState::Detected {
            self.last_detected = Some(idx);
        }
        state
    }

    fn results(&self) -> Vec<CommandResult> {
        match self.last_detected {
            Some(idx) => vec![CommandResult {
                command_id: 4,
                phrase_id: idx as i32,
                phrase: "turn on the light".into(),
                confidence: 0.91,
            }],
            None => vec![],
        }
    }
}

pub struct ScriptedEngine {
    pub models: Vec<String>,
    pub chunk: usize,
    pub command_chunk: usize,
    /// Channels the session claims to need. `None` uses the session config.
    pub required_channels: Option<usize>,
    pub wake_script: HashMap<usize, WakeState>,
    pub command_script: HashMap<usize, CommandState>,
    pub current: Arc<AtomicUsize>,
    pub sessions: AtomicUsize,
    pub last_session: Mutex<Option<SessionConfig>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            models: vec!["mn5q8_en".into(), "wn9_hiesp".into()],
            chunk: 32,
            command_chunk: 32,
            required_channels: None,
            wake_script: HashMap::new(),
            command_script: HashMap::new(),
            current: Arc::new(AtomicUsize::new(0)),
            sessions: AtomicUsize::new(0),
            last_session: Mutex::new(None),
        }
    }

    pub fn wake_at(mut self, frame: usize) -> Self {
        self.wake_script.insert(frame, WakeState::Detected);
        self
    }

    pub fn command_at(mut self, frame: usize, state: CommandState) -> Self {
        self.command_script.insert(frame, state);
        self
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn load_models(&self, _partition: &str) -> Result<ModelStore> {
        Ok(ModelStore::from_names(self.models.clone()))
    }

    fn create_session(&self, config: &SessionConfig) -> Result<Arc<dyn FrontEnd>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        *self.last_session.lock() = Some(config.clone());
        Ok(Arc::new(ScriptedFrontEnd {
            chunk: self.chunk,
            required_channels: self
                .required_channels
                .unwrap_or(config.mic_channels + config.ref_channels),
            wake_script: self.wake_script.clone(),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
            wake_enabled: AtomicBool::new(config.wake_enabled),
            current: Arc::clone(&self.current),
        }))
    }

    fn create_command_model(&self, _name: &str, _window_ms: u32) -> Result<Box<dyn CommandModel>> {
        Ok(Box::new(ScriptedCommandModel {
            chunk: self.command_chunk,
            script: self.command_script.clone(),
            last_detected: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Indicator and sink
// ---------------------------------------------------------------------------

/// Records `(on, frame index)` for every indicator write.
pub struct RecordingIndicator {
    pub log: Mutex<Vec<(bool, usize)>>,
    current: Arc<AtomicUsize>,
}

impl RecordingIndicator {
    pub fn new(current: Arc<AtomicUsize>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            current,
        }
    }
}

impl Indicator for RecordingIndicator {
    fn turn_on(&self) -> Result<()> {
        self.log.lock().push((true, self.current.load(Ordering::SeqCst)));
        Ok(())
    }

    fn turn_off(&self) -> Result<()> {
        self.log.lock().push((false, self.current.load(Ordering::SeqCst)));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<CommandResult>>>,
}

impl CommandSink for RecordingSink {
    fn dispatch(&self, results: &[CommandResult]) -> Result<()> {
        self.batches.lock().push(results.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Defaults with pinning off so tests do not depend on the host's cores.
pub fn test_config() -> AssistantConfig {
    AssistantConfig {
        feed_core: None,
        detect_core: None,
        ..AssistantConfig::default()
    }
}

/// Collect events until one matches `done`, failing after `timeout`.
pub fn recv_until(
    rx: &mut broadcast::Receiver<AssistantEvent>,
    timeout: Duration,
    done: impl Fn(&EventKind) -> bool,
) -> Vec<EventKind> {
    let start = Instant::now();
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => {
                let finished = done(&ev.kind);
                seen.push(ev.kind);
                if finished {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for event; saw {seen:?}");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
        }
    }
}
