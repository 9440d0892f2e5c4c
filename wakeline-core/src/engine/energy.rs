//! Energy trigger using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute the RMS of the frame, normalised to [0.0, 1.0].
//! 2. If RMS ≥ `threshold` → active, reset hangover counter.
//! 3. If RMS < `threshold` and hangover counter > 0 → still active,
//!    decrement counter (bridges short gaps between syllables).
//! 4. Otherwise → inactive.

/// A simple energy-based activity detector over `i16` frames.
#[derive(Debug, Clone)]
pub struct EnergyTrigger {
    /// Normalised RMS threshold. Frames at or above it are active.
    threshold: f32,
    /// Quiet frames still reported active after real activity ends.
    hangover_frames: u32,
    hangover_counter: u32,
}

impl EnergyTrigger {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// Root-mean-square of a frame, normalised to full scale.
    pub fn rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples
            .iter()
            .map(|s| {
                let v = *s as f64 / 32768.0;
                v * v
            })
            .sum();
        (sum_sq / samples.len() as f64).sqrt() as f32
    }

    pub fn classify(&mut self, samples: &[i16]) -> bool {
        if Self::rms(samples) >= self.threshold {
            self.hangover_counter = self.hangover_frames;
            true
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

impl Default for EnergyTrigger {
    fn default() -> Self {
        Self::new(0.05, 4)
    }
}
