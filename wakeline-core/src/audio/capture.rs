//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a mutex, or perform I/O. It widens each
//! sample to a raw 32-bit slot and pushes it into an SPSC ring whose
//! `push_iter` is lock-free and allocation-free, then pokes a condvar.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. The stream is therefore
//! opened, kept alive and dropped on a dedicated `audio-capture` thread; the
//! `AudioCapture` handle itself only holds the ring consumer and can move to
//! the feed task freely.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::{
    audio::{AudioFormat, AudioSource, SampleNarrowing},
    buffering::{create_slot_ring, Consumer, SlotConsumer, SlotProducer},
    error::{Result, WakelineError},
};

/// Seconds of raw audio the capture ring can hold before the callback drops.
const RING_SECONDS: usize = 2;

/// Upper bound on a single condvar wait. The callback notifies without the
/// lock, so a wake-up can race the reader's emptiness check; the bound
/// caps how long such a race can stall a read.
const DATA_WAIT: Duration = Duration::from_millis(10);

#[cfg(feature = "audio-cpal")]
type StreamGuard = cpal::Stream;
#[cfg(not(feature = "audio-cpal"))]
type StreamGuard = ();

/// Blocking [`AudioSource`] backed by the host's input device.
pub struct AudioCapture {
    preferred_device: Option<String>,
    channels: usize,
    narrowing: SampleNarrowing,
    consumer: Option<SlotConsumer>,
    data_ready: Arc<Condvar>,
    wait_lock: Mutex<()>,
    /// Last error reported by the stream's error callback.
    fault: Arc<Mutex<Option<String>>>,
    stop_tx: Option<Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
    raw: Vec<i32>,
}

impl AudioCapture {
    /// Capture from `preferred_device` if present, otherwise the default input.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            channels: 0,
            narrowing: SampleNarrowing::FULL_SCALE,
            consumer: None,
            data_ready: Arc::new(Condvar::new()),
            wait_lock: Mutex::new(()),
            fault: Arc::new(Mutex::new(None)),
            stop_tx: None,
            stream_thread: None,
            raw: Vec::new(),
        }
    }
}

impl AudioSource for AudioCapture {
    fn init(&mut self, format: &AudioFormat) -> Result<()> {
        if self.stream_thread.is_some() {
            return Err(WakelineError::AudioInit("capture already initialised".into()));
        }

        let channels = format.layout.channel_count();
        let capacity = format.sample_rate as usize * channels * RING_SECONDS;
        let (producer, consumer) = create_slot_ring(capacity);

        // Sync oneshot: the stream thread reports open success/failure.
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<SampleNarrowing>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let format = *format;
        let preferred = self.preferred_device.clone();
        let data_ready = Arc::clone(&self.data_ready);
        let fault = Arc::clone(&self.fault);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match open_stream(preferred.as_deref(), &format, producer, data_ready, fault)
                {
                    Ok((stream, narrowing)) => {
                        let _ = open_tx.send(Ok(narrowing));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Park until teardown (or until the handle is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                info!("capture stream released");
            })
            .map_err(|e| WakelineError::AudioInit(e.to_string()))?;

        match open_rx.recv() {
            Ok(Ok(narrowing)) => {
                self.channels = channels;
                self.narrowing = narrowing;
                self.consumer = Some(consumer);
                self.stop_tx = Some(stop_tx);
                self.stream_thread = Some(handle);
                info!(
                    sample_rate = format.sample_rate,
                    channels,
                    payload_bits = narrowing.payload_bits(),
                    "audio capture started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(WakelineError::AudioInit(
                    "capture thread died before opening the device".into(),
                ))
            }
        }
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        if self.raw.len() != frame.len() {
            self.raw = vec![0; frame.len()];
        }
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| WakelineError::AudioRead("capture not initialised".into()))?;

        let mut filled = 0;
        while filled < frame.len() {
            if let Some(fault) = self.fault.lock().take() {
                return Err(WakelineError::AudioRead(fault));
            }
            let alive = self
                .stream_thread
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false);
            if !alive {
                return Err(WakelineError::AudioRead("capture stream stopped".into()));
            }

            filled += consumer.pop_slice(&mut self.raw[filled..]);
            if filled < frame.len() {
                let mut guard = self.wait_lock.lock();
                self.data_ready.wait_for(&mut guard, DATA_WAIT);
            }
        }

        self.narrowing.narrow_slice(&self.raw, frame);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.consumer = None;
        // Dropping the sender also releases the stream thread.
        self.stop_tx.take();
        if let Some(handle) = self.stream_thread.take() {
            handle
                .join()
                .map_err(|_| WakelineError::AudioTeardown("capture thread panicked".into()))?;
        }
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.stream_thread.is_some() {
            if let Err(e) = self.teardown() {
                warn!("capture teardown on drop failed: {e}");
            }
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn open_stream(
    preferred_device_name: Option<&str>,
    format: &AudioFormat,
    producer: SlotProducer,
    data_ready: Arc<Condvar>,
    fault: Arc<Mutex<Option<String>>>,
) -> Result<(StreamGuard, SampleNarrowing)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, StreamConfig};

    use crate::audio::sample::{f32_to_slot, i16_to_slot};

    let host = cpal::default_host();
    let mut selected_device = None;

    if let Some(preferred_name) = preferred_device_name {
        match host.input_devices() {
            Ok(mut devices) => {
                selected_device = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if selected_device.is_none() {
                    warn!(
                        "preferred input device '{}' not found, falling back",
                        preferred_name
                    );
                }
            }
            Err(e) => {
                warn!("failed to list input devices while resolving preference: {e}");
            }
        }
    }

    let device = match selected_device {
        Some(device) => device,
        None => host
            .default_input_device()
            .ok_or(WakelineError::NoDefaultInputDevice)?,
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let channels = format.layout.channel_count() as u16;
    let rate = SampleRate(format.sample_rate);
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| WakelineError::AudioInit(e.to_string()))?
        .filter(|r| r.channels() == channels && r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .collect();

    // Prefer the widest integer format.
    let sample_format = [SampleFormat::I32, SampleFormat::I16, SampleFormat::F32]
        .into_iter()
        .find(|f| ranges.iter().any(|r| r.sample_format() == *f))
        .ok_or_else(|| {
            WakelineError::AudioInit(format!(
                "device supports no {} Hz / {} channel input format",
                format.sample_rate, channels
            ))
        })?;

    let config = StreamConfig {
        channels,
        sample_rate: rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let on_error = {
        let data_ready = Arc::clone(&data_ready);
        move |err: cpal::StreamError| {
            tracing::error!("audio stream error: {err}");
            *fault.lock() = Some(err.to_string());
            data_ready.notify_all();
        }
    };

    let (stream, narrowing) = match sample_format {
        SampleFormat::I32 => (
            device.build_input_stream(
                &config,
                slot_writer(producer, data_ready, |s: i32| s),
                on_error,
                None,
            ),
            host_narrowing(SampleFormat::I32),
        ),
        SampleFormat::I16 => (
            device.build_input_stream(
                &config,
                slot_writer(producer, data_ready, i16_to_slot),
                on_error,
                None,
            ),
            host_narrowing(SampleFormat::I16),
        ),
        _ => (
            device.build_input_stream(
                &config,
                slot_writer(producer, data_ready, f32_to_slot),
                on_error,
                None,
            ),
            host_narrowing(SampleFormat::F32),
        ),
    };
    let stream = stream.map_err(|e| WakelineError::AudioInit(e.to_string()))?;

    stream
        .play()
        .map_err(|e| WakelineError::AudioInit(e.to_string()))?;

    info!(?sample_format, "audio stream playing");
    Ok((stream, narrowing))
}

/// Narrowing for slots widened from a host stream sample.
///
/// Host backends deliver full-scale samples in every format, so the
/// configured I2S slot layout never applies to live capture. Only raw slot
/// recordings (32-bit integer WAV) honour `AudioFormat::narrowing`.
#[cfg(feature = "audio-cpal")]
fn host_narrowing(sample_format: cpal::SampleFormat) -> SampleNarrowing {
    use cpal::SampleFormat;

    match sample_format {
        SampleFormat::I32 | SampleFormat::I16 | SampleFormat::F32 => SampleNarrowing::FULL_SCALE,
        other => {
            warn!(?other, "unexpected host sample format, assuming full scale");
            SampleNarrowing::FULL_SCALE
        }
    }
}

/// Build the real-time callback: widen, push, notify. Zero allocation.
#[cfg(feature = "audio-cpal")]
fn slot_writer<T: Copy + Send + 'static>(
    mut producer: SlotProducer,
    data_ready: Arc<Condvar>,
    widen: fn(T) -> i32,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static {
    use crate::buffering::Producer;

    move |data: &[T], _info| {
        let written = producer.push_iter(data.iter().map(|s| widen(*s)));
        if written < data.len() {
            warn!(
                "capture ring full: dropped {} samples",
                data.len() - written
            );
        }
        data_ready.notify_one();
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
fn open_stream(
    _preferred_device_name: Option<&str>,
    _format: &AudioFormat,
    _producer: SlotProducer,
    _data_ready: Arc<Condvar>,
    _fault: Arc<Mutex<Option<String>>>,
) -> Result<(StreamGuard, SampleNarrowing)> {
    Err(WakelineError::AudioInit(
        "compiled without audio-cpal feature".into(),
    ))
}
