//! # wakeline-core
//!
//! Always-on voice trigger: wake word, then one command from a small
//! vocabulary inside a bounded listening window.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ──► feed task ──► RecognitionEngine session (ring) ──► detect task
//!  (cpal/WAV)     [core 0]          feed ▸ fetch                     [core 1]
//!                                                                      │
//!                                        Armed ⇄ CommandListening state machine
//!                                                                      │
//!                                     Indicator · CommandSink · broadcast::Sender<AssistantEvent>
//! ```
//!
//! [`VoiceAssistant`] owns startup ordering and teardown. The two tasks
//! only meet inside the engine session; neither blocks on the other.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod actuation;
pub mod assistant;
pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod indicator;
pub mod pipeline;

// Convenience re-exports for downstream crates
pub use actuation::{CommandSink, LogPwmChannel, PwmDispatcher};
pub use assistant::{AssistantConfig, VoiceAssistant};
pub use audio::{AudioCapture, AudioFormat, AudioSource, ChannelLayout, SampleNarrowing, WavSource};
pub use engine::{
    CommandResult, RecognitionEngine, SessionConfig, StubEngine, StubTuning,
};
pub use error::{Result, WakelineError};
pub use events::{AssistantEvent, AssistantStatus, EventKind};
pub use indicator::{Indicator, LedIndicator, LogStrip};
pub use pipeline::{DetectionState, DiagnosticsSnapshot};
