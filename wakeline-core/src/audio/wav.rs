//! Replay a WAV recording as if it were the capture peripheral.
//!
//! Useful for bench runs and for reproducing a session offline. When pacing
//! is enabled `read_frame` sleeps so frames are delivered no faster than the
//! file's sample rate, matching the hardware clock. End of file is a read
//! failure, exactly like a dead peripheral.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use tracing::info;

use crate::{
    audio::{sample::f32_to_slot, AudioFormat, AudioSource, SampleNarrowing},
    error::{Result, WakelineError},
};

pub struct WavSource {
    path: PathBuf,
    paced: bool,
    reader: Option<WavReader<BufReader<File>>>,
    float: bool,
    channels: usize,
    sample_rate: u32,
    narrowing: SampleNarrowing,
    next_deadline: Option<Instant>,
}

impl WavSource {
    /// Replay `path`, pacing frames at the file's sample rate when `paced`.
    pub fn new(path: impl AsRef<Path>, paced: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            paced,
            reader: None,
            float: false,
            channels: 0,
            sample_rate: 0,
            narrowing: SampleNarrowing::FULL_SCALE,
            next_deadline: None,
        }
    }

    fn next_slot(&mut self) -> Result<i32> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| WakelineError::AudioRead("replay source not initialised".into()))?;

        let slot = if self.float {
            reader.samples::<f32>().next().transpose()?.map(f32_to_slot)
        } else {
            reader.samples::<i32>().next().transpose()?
        };
        slot.ok_or_else(|| WakelineError::AudioRead("end of replay file".into()))
    }

    fn pace(&mut self, samples: usize) {
        if !self.paced || self.channels == 0 || self.sample_rate == 0 {
            return;
        }
        let frames = (samples / self.channels) as u64;
        let period = Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64);
        let deadline = self.next_deadline.unwrap_or_else(Instant::now) + period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline);
    }
}

impl AudioSource for WavSource {
    fn init(&mut self, format: &AudioFormat) -> Result<()> {
        let reader = WavReader::open(&self.path).map_err(|e| {
            WakelineError::AudioInit(format!("{}: {e}", self.path.display()))
        })?;
        let spec = reader.spec();

        if spec.sample_rate != format.sample_rate {
            return Err(WakelineError::AudioInit(format!(
                "replay file is {} Hz, pipeline runs at {} Hz",
                spec.sample_rate, format.sample_rate
            )));
        }
        let channels = spec.channels as usize;
        if channels != format.layout.channel_count() {
            return Err(WakelineError::AudioInit(format!(
                "replay file has {channels} channels, expected {}",
                format.layout.channel_count()
            )));
        }

        let (float, narrowing) = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => (true, SampleNarrowing::FULL_SCALE),
            (SampleFormat::Int, 32) => (false, format.narrowing),
            (SampleFormat::Int, bits @ (16 | 24)) => (false, SampleNarrowing::new(bits as u32)?),
            (fmt, bits) => {
                return Err(WakelineError::AudioInit(format!(
                    "unsupported replay format {fmt:?} / {bits} bits"
                )))
            }
        };

        info!(
            path = %self.path.display(),
            channels,
            bits = spec.bits_per_sample,
            paced = self.paced,
            "replay source opened"
        );

        self.reader = Some(reader);
        self.float = float;
        self.channels = channels;
        self.sample_rate = spec.sample_rate;
        self.narrowing = narrowing;
        self.next_deadline = None;
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        for dst in frame.iter_mut() {
            let slot = self.next_slot()?;
            *dst = self.narrowing.narrow(slot);
        }
        self.pace(frame.len());
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ChannelLayout;

    fn write_fixture(name: &str, bits: u16, samples: &[i32]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "wakeline-wav-{}-{name}.wav",
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create fixture");
        for s in samples {
            writer.write_sample(*s).expect("write sample");
        }
        writer.finalize().expect("finalize fixture");
        path
    }

    #[test]
    fn replays_sixteen_bit_frames_then_fails_at_eof() {
        let path = write_fixture("s16", 16, &[1, -1, 2, -2]);
        let mut source = WavSource::new(&path, false);
        source.init(&AudioFormat::default()).expect("init");
        assert_eq!(source.channel_count(), 2);

        let mut frame = [0i16; 4];
        source.read_frame(&mut frame).expect("first frame");
        assert_eq!(frame, [1, -1, 2, -2]);

        let err = source.read_frame(&mut frame).expect_err("eof");
        assert!(matches!(err, WakelineError::AudioRead(_)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn thirty_two_bit_slots_use_configured_narrowing() {
        let path = write_fixture("s32", 32, &[0xFF12_3456_u32 as i32, 0x0080_0000]);
        let mut source = WavSource::new(&path, false);
        source.init(&AudioFormat::default()).expect("init");

        let mut frame = [0i16; 2];
        source.read_frame(&mut frame).expect("frame");
        assert_eq!(frame, [0x1234, i16::MIN]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_mismatched_layout() {
        let path = write_fixture("layout", 16, &[0, 0]);
        let mut source = WavSource::new(&path, false);
        let format = AudioFormat {
            layout: ChannelLayout::Mono,
            ..AudioFormat::default()
        };
        let err = source.init(&format).expect_err("layout mismatch");
        assert!(matches!(err, WakelineError::AudioInit(_)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_fails_init() {
        let mut source = WavSource::new("/nonexistent/wakeline.wav", true);
        assert!(source.init(&AudioFormat::default()).is_err());
    }
}
