//! `StubEngine`: in-process recognition engine without real models.
//!
//! Lets the whole pipeline run end-to-end on a development host:
//!
//! - feed → fetch goes through a bounded SPSC ring of `ring_chunks` fetch
//!   chunks, down-mixed to mono. When the fetcher falls behind the newest
//!   samples are dropped and counted.
//! - the "wake word" is any sustained burst of energy lasting `wake_frames`
//!   consecutive frames.
//! - the command model reports `Detected` with a placeholder result when a
//!   speech burst ends, and `Timeout` once the window passes in silence.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    buffering::{
        create_sample_ring, Consumer, Observer, Producer, SampleConsumer, SampleProducer,
    },
    engine::{
        energy::EnergyTrigger, CommandModel, CommandResult, CommandState, FetchResult, FrontEnd,
        ModelStore, RecognitionEngine, SessionConfig, WakeState,
    },
    error::{Result, WakelineError},
};

/// Knobs for the stub engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct StubTuning {
    /// Samples per channel per feed, and samples per fetch.
    pub chunk_size: usize,
    /// Normalised RMS at which a frame counts as speech.
    pub energy_threshold: f32,
    pub hangover_frames: u32,
    /// Consecutive speech frames that count as the wake phrase.
    pub wake_frames: usize,
    /// Speech frames needed before a burst counts as a command.
    pub command_min_frames: usize,
    /// Models reported when the partition is not a directory on disk.
    pub builtin_models: Vec<String>,
    /// Rate used to turn the listening window into a frame count.
    pub sample_rate: u32,
}

impl Default for StubTuning {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            energy_threshold: 0.05,
            hangover_frames: 4,
            wake_frames: 6,
            command_min_frames: 4,
            builtin_models: vec!["mn5q8_en".into(), "wn9_hiesp".into()],
            sample_rate: 16_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubEngine {
    tuning: StubTuning,
}

impl StubEngine {
    pub fn new(tuning: StubTuning) -> Self {
        Self { tuning }
    }
}

impl RecognitionEngine for StubEngine {
    fn load_models(&self, partition: &str) -> Result<ModelStore> {
        let dir = Path::new(partition);
        if dir.is_dir() {
            return ModelStore::load_dir(dir);
        }
        debug!(partition, "partition is not a directory, using built-in model list");
        Ok(ModelStore::from_names(self.tuning.builtin_models.clone()))
    }

    fn create_session(&self, config: &SessionConfig) -> Result<Arc<dyn FrontEnd>> {
        Ok(Arc::new(StubFrontEnd::new(&self.tuning, config)?))
    }

    fn create_command_model(&self, name: &str, window_ms: u32) -> Result<Box<dyn CommandModel>> {
        info!(model = name, window_ms, "stub command model created");
        Ok(Box::new(StubCommandModel::new(
            &self.tuning,
            window_ms,
            self.tuning.sample_rate,
        )))
    }
}

struct FeedSide {
    ring: SampleProducer,
    mix: Vec<i16>,
}

struct FetchSide {
    ring: SampleConsumer,
    trigger: EnergyTrigger,
    speech_run: usize,
}

/// Session handle of the stub engine.
pub struct StubFrontEnd {
    chunk: usize,
    total_channels: usize,
    mic_channels: usize,
    ref_channels: usize,
    wake_frames: usize,
    feed_side: Mutex<FeedSide>,
    fetch_side: Mutex<FetchSide>,
    data_ready: Condvar,
    wake_enabled: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicUsize,
}

impl StubFrontEnd {
    pub fn new(tuning: &StubTuning, config: &SessionConfig) -> Result<Self> {
        if tuning.chunk_size == 0 {
            return Err(WakelineError::SessionCreate("chunk size must be non-zero".into()));
        }
        if config.mic_channels == 0
            || config.mic_channels + config.ref_channels > config.total_channels
        {
            return Err(WakelineError::SessionCreate(format!(
                "bad channel split: {} mic + {} ref in {} total",
                config.mic_channels, config.ref_channels, config.total_channels
            )));
        }
        if config.ring_chunks == 0 {
            return Err(WakelineError::SessionCreate("ring must hold at least one chunk".into()));
        }

        let (producer, consumer) = create_sample_ring(tuning.chunk_size * config.ring_chunks);
        info!(
            chunk = tuning.chunk_size,
            total_channels = config.total_channels,
            mic_channels = config.mic_channels,
            ring_chunks = config.ring_chunks,
            wake_model = %config.wake_model,
            "stub session created"
        );

        Ok(Self {
            chunk: tuning.chunk_size,
            total_channels: config.total_channels,
            mic_channels: config.mic_channels,
            ref_channels: config.ref_channels,
            wake_frames: tuning.wake_frames.max(1),
            feed_side: Mutex::new(FeedSide {
                ring: producer,
                mix: vec![0; tuning.chunk_size],
            }),
            fetch_side: Mutex::new(FetchSide {
                ring: consumer,
                trigger: EnergyTrigger::new(tuning.energy_threshold, tuning.hangover_frames),
                speech_run: 0,
            }),
            data_ready: Condvar::new(),
            wake_enabled: AtomicBool::new(config.wake_enabled),
            closed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Samples discarded because the fetch side fell behind.
    pub fn dropped_samples(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn wake_enabled(&self) -> bool {
        self.wake_enabled.load(Ordering::Acquire)
    }
}

impl FrontEnd for StubFrontEnd {
    fn feed_chunk_size(&self) -> usize {
        self.chunk
    }

    fn fetch_chunk_size(&self) -> usize {
        self.chunk
    }

    fn channel_count(&self) -> usize {
        self.mic_channels + self.ref_channels
    }

    fn feed(&self, frame: &[i16]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WakelineError::EngineClosed);
        }
        let expected = self.chunk * self.total_channels;
        if frame.len() != expected {
            return Err(WakelineError::FrameSize {
                expected,
                got: frame.len(),
            });
        }

        let lost = {
            let mut side = self.feed_side.lock();
            let FeedSide { ring, mix } = &mut *side;
            for (dst, slot) in mix.iter_mut().zip(frame.chunks_exact(self.total_channels)) {
                let sum: i32 = slot[..self.mic_channels].iter().map(|s| *s as i32).sum();
                *dst = (sum / self.mic_channels as i32) as i16;
            }
            mix.len() - ring.push_slice(mix)
        };
        if lost > 0 {
            let total = self.dropped.fetch_add(lost, Ordering::Relaxed) + lost;
            warn!(lost, total, "stub ring full: fetch side is falling behind");
        }

        // Notify under the fetch lock so the wake-up cannot fall between
        // the fetcher's occupancy check and its wait.
        let _fetch = self.fetch_side.lock();
        self.data_ready.notify_one();
        Ok(())
    }

    fn fetch(&self, frame: &mut [i16]) -> Result<FetchResult> {
        if frame.len() != self.chunk {
            return Err(WakelineError::FrameSize {
                expected: self.chunk,
                got: frame.len(),
            });
        }

        let mut side = self.fetch_side.lock();
        while side.ring.occupied_len() < self.chunk {
            if self.closed.load(Ordering::Acquire) {
                return Err(WakelineError::EngineClosed);
            }
            self.data_ready.wait(&mut side);
        }
        side.ring.pop_slice(frame);

        let speech = side.trigger.classify(frame);
        side.speech_run = if speech { side.speech_run + 1 } else { 0 };

        let wake_state = if self.wake_enabled() && side.speech_run == self.wake_frames {
            WakeState::Detected
        } else {
            WakeState::NoDetect
        };
        Ok(FetchResult { wake_state, speech })
    }

    fn enable_wake(&self) {
        self.wake_enabled.store(true, Ordering::Release);
    }

    fn disable_wake(&self) {
        self.wake_enabled.store(false, Ordering::Release);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _fetch = self.fetch_side.lock();
        self.data_ready.notify_all();
    }
}

/// Command model of the stub engine.
pub struct StubCommandModel {
    chunk: usize,
    window_frames: usize,
    min_speech_frames: usize,
    trigger: EnergyTrigger,
    speech_frames: usize,
    idle_frames: usize,
    results: Vec<CommandResult>,
}

impl StubCommandModel {
    pub fn new(tuning: &StubTuning, window_ms: u32, sample_rate: u32) -> Self {
        let window_samples = window_ms as usize * sample_rate as usize / 1000;
        Self {
            chunk: tuning.chunk_size,
            window_frames: (window_samples / tuning.chunk_size.max(1)).max(1),
            min_speech_frames: tuning.command_min_frames.max(1),
            trigger: EnergyTrigger::new(tuning.energy_threshold, tuning.hangover_frames),
            speech_frames: 0,
            idle_frames: 0,
            results: Vec::new(),
        }
    }
}

impl CommandModel for StubCommandModel {
    fn sample_chunk_size(&self) -> usize {
        self.chunk
    }

    fn reset(&mut self) {
        self.trigger.reset();
        self.speech_frames = 0;
        self.idle_frames = 0;
        self.results.clear();
    }

    fn detect(&mut self, frame: &[i16]) -> CommandState {
        if self.trigger.classify(frame) {
            self.speech_frames += 1;
            self.idle_frames = 0;
            return CommandState::Detecting;
        }

        if self.speech_frames >= self.min_speech_frames {
            self.results = vec![CommandResult {
                command_id: 0,
                phrase_id: 0,
                phrase: format!("[stub: {} frames]", self.speech_frames),
                confidence: 1.0,
            }];
            self.speech_frames = 0;
            self.idle_frames = 0;
            return CommandState::Detected;
        }

        self.speech_frames = 0;
        self.idle_frames += 1;
        if self.idle_frames >= self.window_frames {
            self.idle_frames = 0;
            CommandState::Timeout
        } else {
            CommandState::Detecting
        }
    }

    fn results(&self) -> Vec<CommandResult> {
        self.results.clone()
    }
}
