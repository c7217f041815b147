use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::consts::{FULL_SCALE_16, FULL_SCALE_24, SAMPLE_RATE_MAX, SAMPLE_RATE_THRESHOLDS};
use crate::{DType, Result, TileError, TileErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BitDepth {
    Sixteen,
    TwentyFour,
}

impl BitDepth {
    pub fn for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Uint8 | DType::Int8 | DType::Uint16 | DType::Int16 => Self::Sixteen,
            DType::Uint32 | DType::Int32 | DType::Float32 => Self::TwentyFour,
            DType::Uint64 | DType::Int64 | DType::Float64 => {
                warn!("Unhandled dtype {dtype}, defaulting to 24-bit samples");
                Self::TwentyFour
            }
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            Self::Sixteen => 2,
            Self::TwentyFour => 3,
        }
    }

    pub fn full_scale(self) -> f64 {
        match self {
            Self::Sixteen => FULL_SCALE_16,
            Self::TwentyFour => FULL_SCALE_24,
        }
    }

    pub fn max_sample(self) -> i32 {
        (1_i32 << (self.bits() - 1)) - 1
    }

    pub fn min_sample(self) -> i32 {
        -(1_i32 << (self.bits() - 1))
    }

    pub(crate) fn mask(self) -> u32 {
        (1_u32 << self.bits()) - 1
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = TileError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            16 => Ok(Self::Sixteen),
            24 => Ok(Self::TwentyFour),
            _ => Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                format!("Unsupported bits per sample {bits}."),
            )),
        }
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> Self {
        depth.bits() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParameters {
    pub bits_per_sample: BitDepth,
    pub sample_rate: u32,
    pub data_min: f64,
    pub data_max: f64,
}

impl QuantizationParameters {
    pub fn select(dtype: DType, width: u32, height: u32, data_min: f64, data_max: f64) -> Self {
        let total_pixels = u64::from(width) * u64::from(height);
        let params = Self {
            bits_per_sample: BitDepth::for_dtype(dtype),
            sample_rate: sample_rate_for_pixels(total_pixels),
            data_min,
            data_max,
        };
        debug!(
            "Selected sample params: {}Hz, {}-bit, range [{data_min}, {data_max}]",
            params.sample_rate,
            params.bits_per_sample.bits()
        );
        params
    }

    pub fn is_degenerate(&self) -> bool {
        self.data_max <= self.data_min
    }

    pub fn error_bound(&self) -> f64 {
        (self.data_max - self.data_min) / (2.0 * self.bits_per_sample.full_scale())
    }

    /// Non-finite cells and a degenerate range both map to the midpoint sample.
    pub fn quantize(&self, value: f64) -> i32 {
        if self.is_degenerate() || !value.is_finite() {
            return 0;
        }
        let span = self.data_max - self.data_min;
        let normalized = (2.0 * (value - self.data_min) / span - 1.0).clamp(-1.0, 1.0);
        (normalized * self.bits_per_sample.full_scale()).round() as i32
    }

    pub fn dequantize(&self, sample: i32, dtype: DType) -> f64 {
        if self.is_degenerate() {
            return self.data_min;
        }
        let normalized = f64::from(sample) / self.bits_per_sample.full_scale();
        let value = (normalized + 1.0) / 2.0 * (self.data_max - self.data_min) + self.data_min;
        if dtype.is_integer() {
            value.round()
        } else {
            value
        }
    }

    pub fn quantize_all(&self, cells: &[f64]) -> Vec<i32> {
        cells.iter().map(|value| self.quantize(*value)).collect()
    }

    pub fn dequantize_all(&self, samples: &[i32], dtype: DType) -> Vec<f64> {
        samples
            .iter()
            .map(|sample| self.dequantize(*sample, dtype))
            .collect()
    }
}

pub fn quantize_cells(
    cells: &[f64],
    dtype: DType,
    width: u32,
    height: u32,
) -> (Vec<i32>, QuantizationParameters) {
    let (data_min, data_max) = finite_range(cells.iter().copied()).unwrap_or((0.0, 0.0));
    let params = QuantizationParameters::select(dtype, width, height, data_min, data_max);
    (params.quantize_all(cells), params)
}

pub fn dequantize_cells(
    samples: &[i32],
    params: &QuantizationParameters,
    dtype: DType,
) -> Vec<f64> {
    params.dequantize_all(samples, dtype)
}

pub(crate) fn sample_rate_for_pixels(total_pixels: u64) -> u32 {
    SAMPLE_RATE_THRESHOLDS
        .iter()
        .find(|(limit, _)| total_pixels < *limit)
        .map(|(_, rate)| *rate)
        .unwrap_or(SAMPLE_RATE_MAX)
}

pub(crate) fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|value| value.is_finite())
        .fold(None, |range, value| match range {
            None => Some((value, value)),
            Some((lo, hi)) => Some((f64::min(lo, value), f64::max(hi, value))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(depth: BitDepth, data_min: f64, data_max: f64) -> QuantizationParameters {
        QuantizationParameters {
            bits_per_sample: depth,
            sample_rate: 44_100,
            data_min,
            data_max,
        }
    }

    #[test]
    fn round_trip_error_stays_within_bound() {
        let ranges = [(0.0, 5000.0), (-12.5, 8848.0), (0.0, 255.0), (-1.0e6, 3.5e6)];
        for depth in [BitDepth::Sixteen, BitDepth::TwentyFour] {
            for (lo, hi) in ranges {
                let p = params(depth, lo, hi);
                let bound = p.error_bound() * (1.0 + 1e-9);
                for step in 0..=997 {
                    let v = lo + (hi - lo) * f64::from(step) / 997.0;
                    let back = p.dequantize(p.quantize(v), DType::Float32);
                    assert!(
                        (back - v).abs() <= bound,
                        "{depth:?} v={v} back={back} bound={bound}"
                    );
                }
            }
        }
    }

    #[test]
    fn integer_round_trip_is_exact_when_resolution_allows() {
        let p = params(BitDepth::Sixteen, 0.0, 5000.0);
        for v in [0.0, 1.0, 2499.0, 2500.0, 4999.0, 5000.0] {
            assert_eq!(p.dequantize(p.quantize(v), DType::Uint16), v);
        }
    }

    #[test]
    fn extremes_hit_full_scale() {
        let p = params(BitDepth::TwentyFour, -3.0, 7.0);
        assert_eq!(p.quantize(-3.0), -8_388_607);
        assert_eq!(p.quantize(7.0), 8_388_607);
        assert_eq!(p.quantize(100.0), 8_388_607);
        assert_eq!(p.quantize(2.0), 0);
    }

    #[test]
    fn degenerate_range_maps_to_midpoint() {
        let p = params(BitDepth::Sixteen, 42.0, 42.0);
        assert!(p.is_degenerate());
        assert_eq!(p.quantize(42.0), 0);
        assert_eq!(p.dequantize(0, DType::Int16), 42.0);
        assert_eq!(p.quantize(f64::NAN), 0);
    }

    #[test]
    fn selects_bit_depth_from_dtype() {
        assert_eq!(BitDepth::for_dtype(DType::Uint8), BitDepth::Sixteen);
        assert_eq!(BitDepth::for_dtype(DType::Int16), BitDepth::Sixteen);
        assert_eq!(BitDepth::for_dtype(DType::Int32), BitDepth::TwentyFour);
        assert_eq!(BitDepth::for_dtype(DType::Float32), BitDepth::TwentyFour);
        assert_eq!(BitDepth::for_dtype(DType::Float64), BitDepth::TwentyFour);
    }

    #[test]
    fn selects_sample_rate_from_pixel_count() {
        assert_eq!(sample_rate_for_pixels(999_999), 44_100);
        assert_eq!(sample_rate_for_pixels(1_000_000), 48_000);
        assert_eq!(sample_rate_for_pixels(50_000_000), 96_000);
        assert_eq!(sample_rate_for_pixels(100_000_000), 192_000);
        let p = QuantizationParameters::select(DType::Uint16, 1000, 1000, 0.0, 1.0);
        assert_eq!(p.sample_rate, 48_000);
    }

    #[test]
    fn quantize_cells_uses_finite_extrema() {
        let cells = [3.0, f64::NAN, -1.0, 9.0];
        let (samples, p) = quantize_cells(&cells, DType::Float32, 2, 2);
        assert_eq!((p.data_min, p.data_max), (-1.0, 9.0));
        assert_eq!(samples[1], 0);
        assert_eq!(samples[2], -8_388_607);
        let back = dequantize_cells(&samples, &p, DType::Float32);
        assert!((back[0] - 3.0).abs() <= p.error_bound());
    }

    #[test]
    fn infinite_cells_do_not_widen_the_range() {
        let cells = [1.0, 2.0, 3.0, f64::INFINITY, f64::NEG_INFINITY];
        let (samples, p) = quantize_cells(&cells, DType::Float32, 5, 1);
        assert_eq!((p.data_min, p.data_max), (1.0, 3.0));
        assert_eq!(&samples[3..], &[0, 0]);
        let back = dequantize_cells(&samples, &p, DType::Float32);
        for (got, want) in back.iter().zip(&cells[..3]) {
            assert!((got - want).abs() <= p.error_bound());
        }
        assert_eq!(back[3], 2.0);
    }

    #[test]
    fn bit_depth_serializes_as_number() {
        let json = serde_json::to_string(&params(BitDepth::TwentyFour, 0.0, 1.0))
            .expect("serialize params");
        assert!(json.contains("\"bits_per_sample\":24"));
        let err = serde_json::from_str::<BitDepth>("20").expect_err("should reject 20 bits");
        assert!(err.to_string().contains("Unsupported bits per sample"));
    }
}
