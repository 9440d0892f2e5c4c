//! Recognition engine contract.
//!
//! The engine is an opaque scoring oracle split in two halves:
//!
//! - [`FrontEnd`]: the session handle. Audio goes in through `feed` at the
//!   feed chunk size and comes out of `fetch` at the fetch chunk size, with
//!   the wake-word verdict attached. The two sides run on different threads
//!   at different rates; the engine buffers between them.
//! - [`CommandModel`]: the second-stage classifier, driven frame by frame by
//!   the detect task only while a listening window is open.
//!
//! The feed and fetch halves are called concurrently through a shared
//! `Arc<dyn FrontEnd>`. Implementations must be safe for exactly one feeder
//! and one fetcher at a time; that is what the `Sync` bound promises.
//! One `fetch` yields at most one wake verdict.

pub mod energy;
pub mod models;
pub mod stub;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use models::{ModelStore, COMMAND_PREFIX, WAKE_PREFIX};
pub use stub::{StubEngine, StubTuning};

/// Wake-word verdict attached to one fetched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    NoDetect,
    /// The engine picked a channel but has not confirmed the phrase yet.
    ChannelVerified,
    Detected,
    /// A code this crate does not know how to interpret.
    Unknown(i32),
}

impl WakeState {
    /// Map a raw engine status code.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => WakeState::NoDetect,
            -1 => WakeState::ChannelVerified,
            1 => WakeState::Detected,
            other => WakeState::Unknown(other),
        }
    }
}

/// Metadata returned alongside each fetched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResult {
    pub wake_state: WakeState,
    /// Voice activity in this frame, when the engine runs a VAD.
    pub speech: bool,
}

impl FetchResult {
    pub fn idle() -> Self {
        Self {
            wake_state: WakeState::NoDetect,
            speech: false,
        }
    }

    pub fn wake() -> Self {
        Self {
            wake_state: WakeState::Detected,
            speech: true,
        }
    }
}

/// Outcome of running the command model over one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Partial utterance; keep feeding frames.
    Detecting,
    /// A phrase completed; results are ready.
    Detected,
    /// The listening window elapsed without further progress.
    Timeout,
    Unknown(i32),
}

impl CommandState {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => CommandState::Detecting,
            1 => CommandState::Detected,
            2 => CommandState::Timeout,
            other => CommandState::Unknown(other),
        }
    }
}

/// One entry of the ranked command list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: i32,
    pub phrase_id: i32,
    /// Phrase text as the model spells it. May be empty.
    pub phrase: String,
    /// Model confidence in [0.0, 1.0].
    pub confidence: f32,
}

/// Fixed construction config for a recognition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    pub wake_enabled: bool,
    pub vad_enabled: bool,
    pub wake_model: String,
    pub sample_rate: u32,
    /// Interleaved channels in each fed frame.
    pub total_channels: usize,
    /// Microphone channels among `total_channels`.
    pub mic_channels: usize,
    /// Playback reference channels among `total_channels`.
    pub ref_channels: usize,
    /// Depth of the feed→fetch buffer, in fetch chunks.
    pub ring_chunks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_enabled: true,
            vad_enabled: true,
            wake_model: "wn9_hiesp".into(),
            sample_rate: 16_000,
            total_channels: 2,
            mic_channels: 2,
            ref_channels: 0,
            ring_chunks: 50,
        }
    }
}

/// Session handle shared by the feed and detect tasks.
pub trait FrontEnd: Send + Sync {
    /// Samples per channel the engine ingests per `feed` call.
    fn feed_chunk_size(&self) -> usize;

    /// Samples `fetch` writes per call.
    fn fetch_chunk_size(&self) -> usize;

    /// Channels the engine needs from the audio source.
    fn channel_count(&self) -> usize;

    /// Push one interleaved frame of `feed_chunk_size * total_channels` samples.
    fn feed(&self, frame: &[i16]) -> Result<()>;

    /// Block until a processed frame is available and write it to `frame`.
    fn fetch(&self, frame: &mut [i16]) -> Result<FetchResult>;

    fn enable_wake(&self);

    fn disable_wake(&self);

    /// Release the session. A blocked or later `fetch` returns
    /// [`WakelineError::EngineClosed`](crate::error::WakelineError::EngineClosed).
    fn close(&self) {}
}

/// Second-stage classifier over a closed vocabulary.
pub trait CommandModel: Send {
    /// Samples `detect` expects per call.
    fn sample_chunk_size(&self) -> usize;

    /// Drop any partial utterance state.
    fn reset(&mut self);

    fn detect(&mut self, frame: &[i16]) -> CommandState;

    /// Ranked results of the last `Detected` outcome, best first.
    fn results(&self) -> Vec<CommandResult>;
}

/// Factory for sessions and command models.
pub trait RecognitionEngine: Send + Sync {
    /// Enumerate the models available in `partition`.
    fn load_models(&self, partition: &str) -> Result<ModelStore>;

    fn create_session(&self, config: &SessionConfig) -> Result<Arc<dyn FrontEnd>>;

    fn create_command_model(&self, name: &str, window_ms: u32) -> Result<Box<dyn CommandModel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_wake_codes_map_to_states() {
        assert_eq!(WakeState::from_raw(0), WakeState::NoDetect);
        assert_eq!(WakeState::from_raw(-1), WakeState::ChannelVerified);
        assert_eq!(WakeState::from_raw(1), WakeState::Detected);
        assert_eq!(WakeState::from_raw(7), WakeState::Unknown(7));
    }

    #[test]
    fn raw_command_codes_map_to_states() {
        assert_eq!(CommandState::from_raw(0), CommandState::Detecting);
        assert_eq!(CommandState::from_raw(1), CommandState::Detected);
        assert_eq!(CommandState::from_raw(2), CommandState::Timeout);
        assert_eq!(CommandState::from_raw(-3), CommandState::Unknown(-3));
    }

    #[test]
    fn command_result_serializes_with_camel_case() {
        let result = CommandResult {
            command_id: 3,
            phrase_id: 11,
            phrase: "turn on the light".into(),
            confidence: 0.87,
        };
        let json = serde_json::to_value(&result).expect("serialize result");
        assert_eq!(json["commandId"], 3);
        assert_eq!(json["phraseId"], 11);
        assert_eq!(json["phrase"], "turn on the light");
        let conf = json["confidence"].as_f64().expect("number");
        approx::assert_abs_diff_eq!(conf, 0.87, epsilon = 1e-5);
    }

    #[test]
    fn session_config_fills_missing_fields_with_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"wakeModel":"wn9_alexa","ringChunks":8}"#).expect("parse");
        assert_eq!(cfg.wake_model, "wn9_alexa");
        assert_eq!(cfg.ring_chunks, 8);
        assert_eq!(cfg.total_channels, 2);
        assert!(cfg.wake_enabled);
    }
}
