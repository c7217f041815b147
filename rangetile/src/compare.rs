use log::debug;

use crate::quantize::finite_range;
use crate::raster::RasterBlock;

pub type BlockShape = [usize; 3];

#[derive(Debug, Clone, PartialEq)]
pub struct BlockComparison {
    pub shape_match: bool,
    pub first_shape: BlockShape,
    pub second_shape: BlockShape,
    pub stats: Option<DifferenceStats>,
    pub bands: Vec<BandComparison>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceStats {
    pub arrays_equal: bool,
    pub max_difference: f64,
    pub mean_difference: f64,
    pub rmse: f64,
    pub first_range: Option<(f64, f64)>,
    pub second_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandComparison {
    pub band: usize,
    pub equal: bool,
    pub max_difference: f64,
    pub mean_difference: f64,
    pub first_range: Option<(f64, f64)>,
    pub second_range: Option<(f64, f64)>,
}

/// Compares `first` against `second`. Cell pairs where either side is NaN
/// count as equal only if both are NaN, and never enter the difference
/// statistics.
pub fn compare_blocks(first: &RasterBlock, second: &RasterBlock) -> BlockComparison {
    let first_shape = shape(first);
    let second_shape = shape(second);
    if first_shape != second_shape {
        debug!("Shape mismatch: {first_shape:?} vs {second_shape:?}");
        return BlockComparison {
            shape_match: false,
            first_shape,
            second_shape,
            stats: None,
            bands: Vec::new(),
        };
    }

    let mut total = Accumulator::default();
    let bands = first
        .bands
        .iter()
        .zip(&second.bands)
        .enumerate()
        .map(|(band, (a, b))| {
            let mut acc = Accumulator::default();
            for (x, y) in a.iter().zip(b) {
                acc.push(*x, *y);
                total.push(*x, *y);
            }
            BandComparison {
                band: band + 1,
                equal: acc.equal,
                max_difference: acc.max,
                mean_difference: acc.mean(),
                first_range: finite_range(a.iter().copied()),
                second_range: finite_range(b.iter().copied()),
            }
        })
        .collect();

    BlockComparison {
        shape_match: true,
        first_shape,
        second_shape,
        stats: Some(DifferenceStats {
            arrays_equal: total.equal,
            max_difference: total.max,
            mean_difference: total.mean(),
            rmse: total.rmse(),
            first_range: finite_range(first.bands.iter().flatten().copied()),
            second_range: finite_range(second.bands.iter().flatten().copied()),
        }),
        bands,
    }
}

fn shape(block: &RasterBlock) -> BlockShape {
    [
        block.band_count(),
        block.height as usize,
        block.width as usize,
    ]
}

struct Accumulator {
    equal: bool,
    count: usize,
    max: f64,
    sum: f64,
    sum_sq: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            equal: true,
            count: 0,
            max: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
}

impl Accumulator {
    fn push(&mut self, x: f64, y: f64) {
        if x.is_nan() || y.is_nan() {
            self.equal &= x.is_nan() && y.is_nan();
            return;
        }
        let diff = (x - y).abs();
        self.equal &= diff == 0.0;
        self.count += 1;
        self.max = self.max.max(diff);
        self.sum += diff;
        self.sum_sq += diff * diff;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn rmse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        }
    }
}
