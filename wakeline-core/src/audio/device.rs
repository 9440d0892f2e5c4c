//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Largest channel count any supported input config offers.
    pub max_channels: u16,
    /// Whether some input config covers the requested sample rate.
    pub supports_rate: bool,
}

impl DeviceInfo {
    /// Whether the pipeline could capture `channels` at the probed rate.
    pub fn is_usable(&self, channels: usize) -> bool {
        self.supports_rate && self.max_channels as usize >= channels
    }
}

/// List all input devices, probing each for `sample_rate` support.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices(sample_rate: u32) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let rate = cpal::SampleRate(sample_rate);

    match host.input_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    let (max_channels, supports_rate) = match device.supported_input_configs() {
                        Ok(ranges) => ranges.fold((0u16, false), |(ch, ok), r| {
                            (
                                ch.max(r.channels()),
                                ok || (r.min_sample_rate() <= rate && rate <= r.max_sample_rate()),
                            )
                        }),
                        Err(e) => {
                            tracing::warn!(device = %name, "failed to query input configs: {e}");
                            (0, false)
                        }
                    };
                    DeviceInfo {
                        name,
                        is_default,
                        max_channels,
                        supports_rate,
                    }
                })
                .collect::<Vec<_>>();

            list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices(_sample_rate: u32) -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::DeviceInfo;

    fn device(max_channels: u16, supports_rate: bool) -> DeviceInfo {
        DeviceInfo {
            name: "Microphone Array".into(),
            is_default: true,
            max_channels,
            supports_rate,
        }
    }

    #[test]
    fn usable_needs_rate_and_enough_channels() {
        assert!(device(2, true).is_usable(2));
        assert!(device(4, true).is_usable(2));
        assert!(!device(1, true).is_usable(2));
        assert!(!device(2, false).is_usable(2));
    }

    #[test]
    fn serializes_with_camel_case() {
        let json = serde_json::to_value(device(2, true)).expect("serialize device");
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["maxChannels"], 2);
        assert_eq!(json["supportsRate"], true);
    }
}
