//! Fixed-point formats of the hardware engine.
//!
//! The HLS design computes with `ap_fixed<W, I>` values using the default
//! quantization (truncate toward negative infinity) and overflow (wrap
//! around) modes. These types reproduce that arithmetic on the host so the
//! export-time shadow pass can predict what the engine will output from the
//! exported float32 weights. Nothing in the training path touches them.

use serde::{Deserialize, Serialize};

/// Signed fixed-point format with `total_bits` bits, `int_bits` of which sit
/// left of the binary point (sign included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPoint {
    pub total_bits: u32,
    pub int_bits: u32,
}

impl FixedPoint {
    pub const fn new(total_bits: u32, int_bits: u32) -> FixedPoint {
        assert!(total_bits >= 2 && total_bits <= 62 && int_bits <= total_bits);
        FixedPoint { total_bits, int_bits }
    }

    pub fn frac_bits(&self) -> u32 {
        self.total_bits - self.int_bits
    }

    /// Weight of the least significant bit.
    pub fn lsb(&self) -> f64 {
        1.0 / (1u64 << self.frac_bits()) as f64
    }

    pub fn min_value(&self) -> f64 {
        -((1u64 << (self.total_bits - 1)) as f64) * self.lsb()
    }

    pub fn max_value(&self) -> f64 {
        ((1u64 << (self.total_bits - 1)) - 1) as f64 * self.lsb()
    }

    /// Truncates `x` to the format's resolution and wraps it into range.
    pub fn quantize(&self, x: f64) -> f64 {
        if !x.is_finite() {
            return 0.0;
        }
        let scale = (1u64 << self.frac_bits()) as f64;
        let raw = (x * scale).floor() as i64;
        let modulus = 1i64 << self.total_bits;
        let half = 1i64 << (self.total_bits - 1);
        let mut wrapped = raw.rem_euclid(modulus);
        if wrapped >= half {
            wrapped -= modulus;
        }
        wrapped as f64 / scale
    }

    pub fn quantize_slice(&self, values: &[f32]) -> Vec<f64> {
        values.iter().map(|&v| self.quantize(v as f64)).collect()
    }
}

/// The three formats the engine uses: activations, parameters and the
/// multiply-accumulate register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareNumerics {
    pub data: FixedPoint,
    pub weight: FixedPoint,
    pub acc: FixedPoint,
}

impl Default for HardwareNumerics {
    /// `ap_fixed<16,8>` data and weights, `ap_fixed<32,16>` accumulator.
    fn default() -> Self {
        HardwareNumerics {
            data: FixedPoint::new(16, 8),
            weight: FixedPoint::new(16, 8),
            acc: FixedPoint::new(32, 16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q8_8_range_and_resolution() {
        let q = FixedPoint::new(16, 8);
        assert_eq!(q.lsb(), 1.0 / 256.0);
        assert_eq!(q.min_value(), -128.0);
        assert_eq!(q.max_value(), 127.99609375);
    }

    #[test]
    fn quantize_truncates_toward_negative_infinity() {
        let q = FixedPoint::new(16, 8);
        assert_eq!(q.quantize(0.5), 0.5);
        assert_eq!(q.quantize(0.001), 0.0);
        assert_eq!(q.quantize(-0.001), -1.0 / 256.0);
        assert_eq!(q.quantize(1.0 / 255.0), 1.0 / 256.0);
    }

    #[test]
    fn quantize_wraps_on_overflow() {
        let q = FixedPoint::new(16, 8);
        assert_eq!(q.quantize(128.0), -128.0);
        assert_eq!(q.quantize(-129.0), 127.0);
        assert_eq!(q.quantize(f64::NAN), 0.0);
    }
}
