//! The two long-running tasks and the counters they share.
//!
//! ```text
//! AudioSource ──read_frame──► feed::run ──feed──► FrontEnd (engine ring)
//!                                                      │ fetch
//!                                                      ▼
//!                     Indicator ◄── detect::Detector ──► CommandSink
//! ```
//!
//! The tasks never talk to each other directly. They only meet inside the
//! engine, which must support one feeder and one fetcher at once.

pub mod detect;
pub mod feed;

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

pub use detect::{DetectionState, Detector};

#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub frames_fed: AtomicUsize,
    pub frames_fetched: AtomicUsize,
    pub wake_detections: AtomicUsize,
    pub command_detections: AtomicUsize,
    pub listening_timeouts: AtomicUsize,
    pub indicator_failures: AtomicUsize,
    pub dispatch_failures: AtomicUsize,
    pub unexpected_results: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_fed.store(0, Ordering::Relaxed);
        self.frames_fetched.store(0, Ordering::Relaxed);
        self.wake_detections.store(0, Ordering::Relaxed);
        self.command_detections.store(0, Ordering::Relaxed);
        self.listening_timeouts.store(0, Ordering::Relaxed);
        self.indicator_failures.store(0, Ordering::Relaxed);
        self.dispatch_failures.store(0, Ordering::Relaxed);
        self.unexpected_results.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_fed: self.frames_fed.load(Ordering::Relaxed),
            frames_fetched: self.frames_fetched.load(Ordering::Relaxed),
            wake_detections: self.wake_detections.load(Ordering::Relaxed),
            command_detections: self.command_detections.load(Ordering::Relaxed),
            listening_timeouts: self.listening_timeouts.load(Ordering::Relaxed),
            indicator_failures: self.indicator_failures.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            unexpected_results: self.unexpected_results.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_fed: usize,
    pub frames_fetched: usize,
    pub wake_detections: usize,
    pub command_detections: usize,
    pub listening_timeouts: usize,
    pub indicator_failures: usize,
    pub dispatch_failures: usize,
    pub unexpected_results: usize,
}
