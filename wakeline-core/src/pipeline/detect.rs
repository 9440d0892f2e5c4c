//! Detect task and the two-stage detection state machine.
//!
//! ```text
//!            wake Detected
//!   Armed ───────────────────► CommandListening ──┐ Detecting / Detected
//!     ▲   reset model,            │     ▲          │ (stay, emit results)
//!     │   disable wake,           │     └──────────┘
//!     │   indicator on            │
//!     └───────────────────────────┘
//!        Timeout: enable wake, indicator off
//! ```
//!
//! While `Armed` the command model is never consulted. While
//! `CommandListening` the wake verdict is ignored (wake detection is off).
//! A successful command does not close the window; only `Timeout` re-arms.
//!
//! The indicator is best effort: a failed `turn_on`/`turn_off` is logged and
//! counted, and the transition happens anyway.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    actuation::CommandSink,
    engine::{CommandModel, CommandState, FetchResult, FrontEnd, WakeState},
    error::{alloc_frame, Result, WakelineError},
    events::{EventBus, EventKind},
    indicator::Indicator,
    pipeline::PipelineDiagnostics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    /// Waiting for the wake phrase.
    Armed,
    /// Waiting for a command inside the listening window.
    CommandListening,
}

/// Owns the detection state. Nothing else writes it; `published` is a
/// read-only mirror for observers.
pub struct Detector {
    state: DetectionState,
    front_end: Arc<dyn FrontEnd>,
    command_model: Box<dyn CommandModel>,
    indicator: Arc<dyn Indicator>,
    sink: Arc<dyn CommandSink>,
    events: Arc<EventBus>,
    diagnostics: Arc<PipelineDiagnostics>,
    published: Arc<Mutex<DetectionState>>,
}

impl Detector {
    pub fn new(
        front_end: Arc<dyn FrontEnd>,
        command_model: Box<dyn CommandModel>,
        indicator: Arc<dyn Indicator>,
        sink: Arc<dyn CommandSink>,
        events: Arc<EventBus>,
        diagnostics: Arc<PipelineDiagnostics>,
        published: Arc<Mutex<DetectionState>>,
    ) -> Self {
        *published.lock() = DetectionState::Armed;
        Self {
            state: DetectionState::Armed,
            front_end,
            command_model,
            indicator,
            sink,
            events,
            diagnostics,
            published,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    /// Advance the machine by one fetched frame.
    pub fn step(&mut self, fetched: &FetchResult, frame: &[i16]) {
        match self.state {
            DetectionState::Armed => self.on_armed(fetched.wake_state),
            DetectionState::CommandListening => {
                let outcome = self.command_model.detect(frame);
                self.on_listening(outcome);
            }
        }
    }

    fn on_armed(&mut self, wake_state: WakeState) {
        match wake_state {
            WakeState::Detected => {
                info!("wake word detected");
                PipelineDiagnostics::bump(&self.diagnostics.wake_detections);
                self.command_model.reset();
                self.front_end.disable_wake();
                if let Err(e) = self.indicator.turn_on() {
                    warn!("indicator on failed: {e}");
                    PipelineDiagnostics::bump(&self.diagnostics.indicator_failures);
                }
                self.transition(DetectionState::CommandListening);
                self.events.emit(EventKind::WakeDetected);
            }
            WakeState::NoDetect => {}
            WakeState::ChannelVerified => debug!("wake channel verified"),
            WakeState::Unknown(code) => {
                warn!(code, "unexpected wake state ignored");
                PipelineDiagnostics::bump(&self.diagnostics.unexpected_results);
            }
        }
    }

    fn on_listening(&mut self, outcome: CommandState) {
        match outcome {
            CommandState::Detecting => {}
            CommandState::Detected => {
                let results = self.command_model.results();
                PipelineDiagnostics::bump(&self.diagnostics.command_detections);
                if results.is_empty() {
                    warn!("command detected without results");
                }
                for (rank, result) in results.iter().enumerate() {
                    info!(
                        rank = rank + 1,
                        command_id = result.command_id,
                        phrase_id = result.phrase_id,
                        phrase = %result.phrase,
                        confidence = result.confidence,
                        "command detected"
                    );
                }
                if let Err(e) = self.sink.dispatch(&results) {
                    warn!("command dispatch failed: {e}");
                    PipelineDiagnostics::bump(&self.diagnostics.dispatch_failures);
                }
                self.events.emit(EventKind::CommandsDetected { results });
            }
            CommandState::Timeout => {
                info!("command window timed out, re-arming");
                PipelineDiagnostics::bump(&self.diagnostics.listening_timeouts);
                self.front_end.enable_wake();
                if let Err(e) = self.indicator.turn_off() {
                    warn!("indicator off failed: {e}");
                    PipelineDiagnostics::bump(&self.diagnostics.indicator_failures);
                }
                self.transition(DetectionState::Armed);
                self.events.emit(EventKind::ListeningTimedOut);
            }
            CommandState::Unknown(code) => {
                warn!(code, "unexpected command state ignored");
                PipelineDiagnostics::bump(&self.diagnostics.unexpected_results);
            }
        }
    }

    fn transition(&mut self, next: DetectionState) {
        debug!(from = ?self.state, to = ?next, "detection state change");
        self.state = next;
        *self.published.lock() = next;
    }
}

/// Run the detect loop until `running` clears and the session is closed.
pub fn run(mut detector: Detector, running: Arc<AtomicBool>) -> Result<()> {
    let chunk = detector.front_end.fetch_chunk_size();
    let mut frame = alloc_frame(chunk).map_err(|e| {
        error!("detect buffer allocation failed: {e}");
        e
    })?;
    info!(fetch_chunk = chunk, "detect task started");

    loop {
        let fetched = match detector.front_end.fetch(&mut frame) {
            Ok(fetched) => fetched,
            Err(WakelineError::EngineClosed) if !running.load(Ordering::Acquire) => break,
            Err(e) => {
                error!(state = ?detector.state, "engine fetch failed: {e}");
                return Err(e);
            }
        };
        PipelineDiagnostics::bump(&detector.diagnostics.frames_fetched);
        detector.step(&fetched, &frame);
    }

    info!(state = ?detector.state, "detect task stopped");
    Ok(())
}
