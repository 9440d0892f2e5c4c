//! Audio source contract and the bundled sources.
//!
//! An [`AudioSource`] is the pacing clock of the whole pipeline: the feed
//! task blocks in [`AudioSource::read_frame`] until the hardware has produced
//! a full frame, so `read_frame` must block rather than return short.
//!
//! Sources deliver interleaved `i16` frames at working precision. Narrowing
//! from the raw capture width is the source's job (see [`sample`]).

pub mod capture;
pub mod device;
pub mod sample;
pub mod wav;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WakelineError};

pub use capture::AudioCapture;
pub use sample::SampleNarrowing;
pub use wav::WavSource;

/// Physical channel arrangement of the capture peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn from_count(channels: usize) -> Result<Self> {
        match channels {
            1 => Ok(ChannelLayout::Mono),
            2 => Ok(ChannelLayout::Stereo),
            n => Err(WakelineError::InvalidConfig(format!(
                "unsupported channel count {n} (expected 1 or 2)"
            ))),
        }
    }
}

/// Capture format requested at initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    /// Width of one raw slot as captured (16, 24 or 32).
    pub bits_per_sample: u32,
    pub narrowing: SampleNarrowing,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            layout: ChannelLayout::Stereo,
            bits_per_sample: 32,
            narrowing: SampleNarrowing::I2S_24_IN_32,
        }
    }
}

/// Contract for the capture peripheral.
///
/// Owned by the feed task once the assistant is initialised; nothing else
/// touches it.
pub trait AudioSource: Send + 'static {
    /// Configure and start the peripheral.
    fn init(&mut self, format: &AudioFormat) -> Result<()>;

    /// Fill `frame` completely with interleaved samples.
    ///
    /// Blocks until `frame.len()` samples are available. There is no
    /// timeout: a returned error means the source cannot make progress.
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()>;

    /// Stop the peripheral and release it.
    fn teardown(&mut self) -> Result<()>;

    /// Number of interleaved channels `read_frame` delivers.
    fn channel_count(&self) -> usize;
}
