//! Raw slot → working-precision sample conversion.
//!
//! The microphone delivers each sample in a 32-bit slot. Only the low
//! `payload_bits` of the slot are driven by the sensor; the bits above that
//! are undefined (high-impedance) and the lowest bits of the payload are
//! below the sensor's useful precision. Narrowing keeps the 16 most
//! significant payload bits:
//!
//! ```text
//! slot:    [ undefined (32 - payload_bits) | payload (payload_bits) ]
//! i16:                                      [ top 16 payload bits ]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, WakelineError};

/// How a 32-bit raw slot maps onto a 16-bit working sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleNarrowing {
    payload_bits: u32,
}

impl SampleNarrowing {
    /// Full-scale 32-bit samples (e.g. host audio APIs).
    pub const FULL_SCALE: Self = Self { payload_bits: 32 };

    /// 24-bit payload in a 32-bit I2S slot.
    pub const I2S_24_IN_32: Self = Self { payload_bits: 24 };

    pub fn new(payload_bits: u32) -> Result<Self> {
        if !(16..=32).contains(&payload_bits) {
            return Err(WakelineError::InvalidConfig(format!(
                "payload_bits must be in 16..=32, got {payload_bits}"
            )));
        }
        Ok(Self { payload_bits })
    }

    pub fn payload_bits(self) -> u32 {
        self.payload_bits
    }

    #[inline]
    pub fn narrow(self, raw: i32) -> i16 {
        // Arithmetic shifts: the left shift drops the undefined bits, the
        // right shift sign-extends from the payload MSB.
        let undefined = 32 - self.payload_bits;
        ((raw << undefined) >> 16) as i16
    }

    pub fn narrow_slice(self, raw: &[i32], out: &mut [i16]) {
        for (dst, src) in out.iter_mut().zip(raw) {
            *dst = self.narrow(*src);
        }
    }
}

impl Default for SampleNarrowing {
    fn default() -> Self {
        Self::I2S_24_IN_32
    }
}

/// Widen a full-scale f32 sample in [-1.0, 1.0] to a full-scale i32 slot.
#[inline]
pub fn f32_to_slot(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32
}

/// Widen an i16 sample to a full-scale i32 slot.
#[inline]
pub fn i16_to_slot(sample: i16) -> i32 {
    (sample as i32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_top_byte_is_discarded() {
        let n = SampleNarrowing::I2S_24_IN_32;
        // Top 8 bits floating high, 24-bit payload 0x12_3456.
        let raw = 0xFF12_3456_u32 as i32;
        assert_eq!(n.narrow(raw), 0x1234);
    }

    #[test]
    fn negative_payload_sign_extends() {
        let n = SampleNarrowing::I2S_24_IN_32;
        // Payload 0x80_0000 is the most negative 24-bit value.
        assert_eq!(n.narrow(0x0080_0000), i16::MIN);
        assert_eq!(n.narrow(0xFF80_0000_u32 as i32), i16::MIN);
        // Payload 0xFF_FF00 is -256 in 24 bits → -1 after dropping 8 bits.
        assert_eq!(n.narrow(0x00FF_FF00), -1);
    }

    #[test]
    fn positive_full_range_payload() {
        let n = SampleNarrowing::I2S_24_IN_32;
        assert_eq!(n.narrow(0xAA7F_FFFF_u32 as i32), i16::MAX);
        assert_eq!(n.narrow(0x0000_00FF), 0);
    }

    #[test]
    fn full_scale_keeps_high_half() {
        let n = SampleNarrowing::FULL_SCALE;
        assert_eq!(n.narrow(0x1234_5678), 0x1234);
        assert_eq!(n.narrow(i32::MIN), i16::MIN);
        assert_eq!(n.narrow(i16_to_slot(-1234)), -1234);
    }

    #[test]
    fn sixteen_bit_payload_is_identity_on_low_half() {
        let n = SampleNarrowing::new(16).expect("valid");
        assert_eq!(n.narrow(0x7FFF_8001_u32 as i32), -32767);
    }

    #[test]
    fn rejects_out_of_range_payload() {
        assert!(SampleNarrowing::new(8).is_err());
        assert!(SampleNarrowing::new(33).is_err());
    }

    #[test]
    fn narrow_slice_converts_each_sample() {
        let n = SampleNarrowing::FULL_SCALE;
        let raw = [i16_to_slot(1), i16_to_slot(-2), f32_to_slot(0.0)];
        let mut out = [0i16; 3];
        n.narrow_slice(&raw, &mut out);
        assert_eq!(out, [1, -2, 0]);
    }
}
