use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, TileError, TileErrorCode};

/// Pixel to geographic mapping, row-major `a, b, c, d, e, f`:
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Geographic extent of a pixel window. Corners are min/max'ed so a
    /// negative y-scale (north-up) still yields `ymin < ymax`.
    pub fn window_bbox(&self, window: &Window) -> BBox {
        let col0 = f64::from(window.col_off);
        let row0 = f64::from(window.row_off);
        let col1 = col0 + f64::from(window.width);
        let row1 = row0 + f64::from(window.height);

        let corners = [
            self.apply(col0, row0),
            self.apply(col1, row0),
            self.apply(col0, row1),
            self.apply(col1, row1),
        ];
        corners.iter().skip(1).fold(
            BBox::new(corners[0].0, corners[0].1, corners[0].0, corners[0].1),
            |bbox, (x, y)| {
                BBox::new(
                    bbox.xmin.min(*x),
                    bbox.ymin.min(*y),
                    bbox.xmax.max(*x),
                    bbox.ymax.max(*y),
                )
            },
        )
    }
}

impl From<[f64; 6]> for Affine {
    fn from(c: [f64; 6]) -> Self {
        Self::new(c[0], c[1], c[2], c[3], c[4], c[5])
    }
}

impl From<Affine> for [f64; 6] {
    fn from(transform: Affine) -> Self {
        transform.coefficients()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Open intersection: boxes sharing only an edge or corner do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.xmin < other.xmax
            && self.xmax > other.xmin
            && self.ymin < other.ymax
            && self.ymax > other.ymin
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.xmin.min(other.xmin),
            self.ymin.min(other.ymin),
            self.xmax.max(other.xmax),
            self.ymax.max(other.ymax),
        )
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        bbox.to_array()
    }
}

/// Parses `xmin,ymin,xmax,ymax`. Order is not checked; an inverted box simply
/// matches nothing.
impl FromStr for BBox {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(TileError::new(
                TileErrorCode::ConfigurationError,
                format!(
                    "Bounding box needs 4 coordinates xmin,ymin,xmax,ymax, got {} in {s:?}.",
                    parts.len()
                ),
            ));
        }

        let mut coords = [0.0_f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part.parse::<f64>().map_err(|_| {
                TileError::new(
                    TileErrorCode::ConfigurationError,
                    format!("Bounding box coordinate {part:?} is not a number."),
                )
            })?;
        }
        Ok(BBox::from(coords))
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl Window {
    pub fn new(col_off: u32, row_off: u32, width: u32, height: u32) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}
