use crate::geometry::{Affine, BBox, Window};
use crate::planner::plan_tiles;
use crate::quantize::finite_range;
use crate::{DType, Result, TileError, TileErrorCode};

const RANGE_SCAN_TILE: u32 = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterAttributes {
    pub width: u32,
    pub height: u32,
    pub count: u8,
    pub dtype: DType,
    pub crs: String,
    pub transform: Affine,
}

impl RasterAttributes {
    pub fn full_window(&self) -> Window {
        Window::new(0, 0, self.width, self.height)
    }

    pub fn bounds(&self) -> BBox {
        self.transform.window_bbox(&self.full_window())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterBlock {
    pub width: u32,
    pub height: u32,
    pub bands: Vec<Vec<f64>>,
}

impl RasterBlock {
    pub fn new(width: u32, height: u32, bands: Vec<Vec<f64>>) -> Result<Self> {
        let expected = (u64::from(width) * u64::from(height)) as usize;
        if bands.is_empty() {
            return Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                "A raster block needs at least one band.",
            ));
        }
        if let Some((band, cells)) = bands.iter().enumerate().find(|(_, b)| b.len() != expected) {
            return Err(TileError::new(
                TileErrorCode::InvalidPayloadLength,
                format!(
                    "Band {band} holds {} cells, expected {expected} for {width}x{height}.",
                    cells.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            bands,
        })
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn interleaved(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.pixel_count() * self.band_count());
        for pixel in 0..self.pixel_count() {
            out.extend(self.bands.iter().map(|band| band[pixel]));
        }
        out
    }

    pub fn from_interleaved(width: u32, height: u32, channels: usize, cells: &[f64]) -> Result<Self> {
        if channels == 0 || cells.len() % channels != 0 {
            return Err(TileError::new(
                TileErrorCode::InvalidPayloadLength,
                format!(
                    "{} interleaved cells cannot be split into {channels} bands.",
                    cells.len()
                ),
            ));
        }
        let mut bands = vec![Vec::with_capacity(cells.len() / channels); channels];
        for pixel in cells.chunks_exact(channels) {
            for (band, value) in bands.iter_mut().zip(pixel) {
                band.push(*value);
            }
        }
        Self::new(width, height, bands)
    }

    pub fn window(&self, window: &Window) -> Result<Self> {
        let fits = u64::from(window.col_off) + u64::from(window.width) <= u64::from(self.width)
            && u64::from(window.row_off) + u64::from(window.height) <= u64::from(self.height);
        if !fits {
            return Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                format!(
                    "Window {window:?} exceeds the {}x{} raster.",
                    self.width, self.height
                ),
            ));
        }

        let stride = self.width as usize;
        let bands = self
            .bands
            .iter()
            .map(|band| {
                let mut cells = Vec::with_capacity(window.pixel_count() as usize);
                for row in window.row_off..window.row_off + window.height {
                    let start = row as usize * stride + window.col_off as usize;
                    cells.extend_from_slice(&band[start..start + window.width as usize]);
                }
                cells
            })
            .collect();
        Self::new(window.width, window.height, bands)
    }

    pub fn paste(&mut self, window: &Window, block: &RasterBlock) -> Result<()> {
        if block.band_count() != self.band_count()
            || block.width != window.width
            || block.height != window.height
            || u64::from(window.col_off) + u64::from(window.width) > u64::from(self.width)
            || u64::from(window.row_off) + u64::from(window.height) > u64::from(self.height)
        {
            return Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                format!(
                    "Cannot paste a {}x{}x{} block at {window:?} into {}x{}x{}.",
                    block.width,
                    block.height,
                    block.band_count(),
                    self.width,
                    self.height,
                    self.band_count()
                ),
            ));
        }

        let stride = self.width as usize;
        let tile_width = window.width as usize;
        for (dst, src) in self.bands.iter_mut().zip(&block.bands) {
            for (row, src_row) in src.chunks_exact(tile_width).enumerate() {
                let start = (window.row_off as usize + row) * stride + window.col_off as usize;
                dst[start..start + tile_width].copy_from_slice(src_row);
            }
        }
        Ok(())
    }
}

pub trait RasterSource: Send + Sync {
    fn attributes(&self) -> &RasterAttributes;

    fn read_window(&self, window: &Window) -> Result<RasterBlock>;

    /// Global extrema over every band, NaN and infinite cells ignored. A raster
    /// with no finite cell reports `(0.0, 0.0)`.
    fn data_range(&self) -> Result<(f64, f64)> {
        let attrs = self.attributes();
        let mut range: Option<(f64, f64)> = None;
        for window in plan_tiles(attrs.height, attrs.width, RANGE_SCAN_TILE)? {
            let block = self.read_window(&window)?;
            let values = block.bands.iter().flatten().copied();
            let block_range = range
                .into_iter()
                .flat_map(|(lo, hi)| [lo, hi])
                .chain(values);
            range = finite_range(block_range);
        }
        Ok(range.unwrap_or((0.0, 0.0)))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryRaster {
    attributes: RasterAttributes,
    block: RasterBlock,
}

impl MemoryRaster {
    pub fn new(attributes: RasterAttributes, bands: Vec<Vec<f64>>) -> Result<Self> {
        if attributes.count as usize != bands.len() {
            return Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                format!(
                    "Attributes declare {} bands, {} provided.",
                    attributes.count,
                    bands.len()
                ),
            ));
        }
        let block = RasterBlock::new(attributes.width, attributes.height, bands)?;
        Ok(Self { attributes, block })
    }

    pub fn block(&self) -> &RasterBlock {
        &self.block
    }
}

impl RasterSource for MemoryRaster {
    fn attributes(&self) -> &RasterAttributes {
        &self.attributes
    }

    fn read_window(&self, window: &Window) -> Result<RasterBlock> {
        self.block.window(window)
    }
}
