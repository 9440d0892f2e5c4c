//! Startup settings (JSON file), read once and never written back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wakeline_core::{
    indicator::REFRESH_INTERVAL, AssistantConfig, AudioFormat, ChannelLayout, SampleNarrowing,
    StubTuning,
};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "WAKELINE_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u32,
    /// Meaningful bits in each captured slot.
    pub payload_bits: u32,
    pub model_partition: String,
    pub wake_model: String,
    pub command_language: String,
    pub command_window_ms: u32,
    pub vad_enabled: bool,
    pub ring_chunks: usize,
    pub feed_core: Option<usize>,
    pub detect_core: Option<usize>,
    pub led_refresh_ms: u64,
    /// Pace `--replay` files at their sample rate.
    pub replay_paced: bool,
    pub stub: StubTuning,
}

impl Default for AppSettings {
    fn default() -> Self {
        let config = AssistantConfig::default();
        Self {
            preferred_input_device: None,
            sample_rate: config.audio.sample_rate,
            channels: config.audio.layout.channel_count(),
            bits_per_sample: config.audio.bits_per_sample,
            payload_bits: config.audio.narrowing.payload_bits(),
            model_partition: config.model_partition,
            wake_model: config.wake_model,
            command_language: config.command_language,
            command_window_ms: config.command_window_ms,
            vad_enabled: config.vad_enabled,
            ring_chunks: config.ring_chunks,
            feed_core: config.feed_core,
            detect_core: config.detect_core,
            led_refresh_ms: REFRESH_INTERVAL.as_millis() as u64,
            replay_paced: true,
            stub: StubTuning::default(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = AppSettings::default();
        self.preferred_input_device = self
            .preferred_input_device
            .take()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.channels = self.channels.clamp(1, 2);
        self.bits_per_sample = normalize_bits_per_sample(self.bits_per_sample);
        self.payload_bits = self.payload_bits.clamp(16, self.bits_per_sample);
        self.model_partition = non_empty_or(&self.model_partition, &defaults.model_partition);
        self.wake_model = non_empty_or(&self.wake_model, &defaults.wake_model);
        self.command_language = self.command_language.trim().to_string();
        self.command_window_ms = self.command_window_ms.clamp(500, 30_000);
        self.ring_chunks = self.ring_chunks.clamp(4, 512);
        self.led_refresh_ms = self.led_refresh_ms.clamp(20, 1_000);
        self.stub.chunk_size = self.stub.chunk_size.clamp(64, 4_096);
        self.stub.energy_threshold = self.stub.energy_threshold.clamp(0.001, 1.0);
        self.stub.wake_frames = self.stub.wake_frames.clamp(1, 200);
        self.stub.sample_rate = self.sample_rate;
    }

    pub fn to_config(&self) -> Result<AssistantConfig> {
        let layout = ChannelLayout::from_count(self.channels)?;
        let narrowing = SampleNarrowing::new(self.payload_bits)?;
        Ok(AssistantConfig {
            audio: AudioFormat {
                sample_rate: self.sample_rate,
                layout,
                bits_per_sample: self.bits_per_sample,
                narrowing,
            },
            model_partition: self.model_partition.clone(),
            wake_model: self.wake_model.clone(),
            command_language: self.command_language.clone(),
            command_window_ms: self.command_window_ms,
            vad_enabled: self.vad_enabled,
            mic_channels: self.channels,
            ref_channels: 0,
            ring_chunks: self.ring_chunks,
            feed_core: self.feed_core,
            detect_core: self.detect_core,
        })
    }
}

fn normalize_bits_per_sample(raw: u32) -> u32 {
    match raw {
        0..=16 => 16,
        17..=24 => 24,
        _ => 32,
    }
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wakeline")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("wakeline")
            .join("settings.json")
    }
}

/// `--settings` wins, then `WAKELINE_SETTINGS`, then the per-user default.
pub fn resolve_settings_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from))
        .unwrap_or_else(default_settings_path)
}

/// A missing file means defaults. An unreadable or malformed one is an error.
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw)
            .with_context(|| format!("malformed settings file {}", path.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("reading settings file {}", path.display()))
        }
    };
    settings.normalize();
    Ok(settings)
}
