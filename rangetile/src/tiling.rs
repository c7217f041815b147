use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use crate::codec::{SampleCompressor, StreamParams};
use crate::config::EncodeOptions;
use crate::container::{write_container, Framing};
use crate::geometry::{BBox, Window};
use crate::index::{Frame, RasterInfo, SpatialIndex};
use crate::planner::plan_tiles;
use crate::quantize::QuantizationParameters;
use crate::raster::{RasterBlock, RasterSource};
use crate::{Result, TileError, TileErrorCode};

#[derive(Debug, Default)]
pub struct EncodeContext {
    bytes_written: u64,
    frames: Vec<Frame>,
    payload: Vec<u8>,
}

impl EncodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn push(&mut self, window: Window, bbox: BBox, bytes: &[u8]) -> &Frame {
        let frame = Frame {
            frame_id: self.frames.len() as u32,
            bbox,
            window,
            byte_offset: self.bytes_written,
            byte_size: bytes.len() as u64,
        };
        debug!(
            "Tile {}: {}x{} at ({}, {}), {} bytes at offset {}",
            frame.frame_id,
            window.width,
            window.height,
            window.col_off,
            window.row_off,
            frame.byte_size,
            frame.byte_offset
        );
        self.bytes_written += frame.byte_size;
        self.payload.extend_from_slice(bytes);
        self.frames.push(frame);
        &self.frames[self.frames.len() - 1]
    }

    fn finish(self) -> (Vec<Frame>, Vec<u8>) {
        (self.frames, self.payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRaster {
    pub index: SpatialIndex,
    pub payload: Vec<u8>,
}

impl EncodedRaster {
    pub fn raster_info(&self) -> Result<&RasterInfo> {
        self.index.raster().ok_or_else(|| {
            TileError::new(
                TileErrorCode::MissingRequiredField,
                "Encoded raster carries no raster info.",
            )
        })
    }
}

pub fn encode_raster(
    source: &dyn RasterSource,
    compressor: &dyn SampleCompressor,
    options: &EncodeOptions,
) -> Result<EncodedRaster> {
    options.validate()?;
    let attrs = source.attributes();
    if attrs.count == 0 {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            "Raster has no bands.",
        ));
    }

    let (windows, tile_size) = if options.spatial_tiling {
        (
            plan_tiles(attrs.height, attrs.width, options.tile_size)?,
            options.tile_size,
        )
    } else {
        let full = attrs.full_window();
        let windows = if full.pixel_count() == 0 {
            Vec::new()
        } else {
            vec![full]
        };
        (windows, attrs.width.max(attrs.height))
    };

    let (data_min, data_max) = source.data_range()?;
    let quantization =
        QuantizationParameters::select(attrs.dtype, attrs.width, attrs.height, data_min, data_max);
    let stream_params = StreamParams {
        sample_rate: quantization.sample_rate,
        channels: attrs.count,
        bits_per_sample: quantization.bits_per_sample,
        compression_level: options.compression_level,
    };
    let job = TileJob {
        source,
        compressor,
        quantization: &quantization,
        stream_params: &stream_params,
    };

    let mut ctx = EncodeContext::new();
    if options.parallel {
        let payloads = windows
            .par_iter()
            .enumerate()
            .map(|(frame_id, window)| job.encode(frame_id, window))
            .collect::<Result<Vec<_>>>()?;
        for (window, bytes) in windows.iter().zip(&payloads) {
            ctx.push(*window, attrs.transform.window_bbox(window), bytes);
        }
    } else {
        for (frame_id, window) in windows.iter().enumerate() {
            let bytes = job.encode(frame_id, window)?;
            ctx.push(*window, attrs.transform.window_bbox(window), &bytes);
        }
    }

    let total = ctx.bytes_written();
    let (frames, payload) = ctx.finish();
    let index = SpatialIndex::new(
        attrs.crs.clone(),
        attrs.transform,
        attrs.width,
        attrs.height,
        tile_size,
        frames,
        Some(RasterInfo {
            count: attrs.count,
            dtype: attrs.dtype,
            quantization,
        }),
    )?;
    info!(
        "Encoded {}x{} raster into {} tiles, {total} payload bytes",
        attrs.width,
        attrs.height,
        index.frames().len()
    );
    Ok(EncodedRaster { index, payload })
}

pub fn encode_to_path(
    source: &dyn RasterSource,
    compressor: &dyn SampleCompressor,
    options: &EncodeOptions,
    path: &Path,
) -> Result<Framing> {
    let encoded = encode_raster(source, compressor, options)?;
    write_container(path, &encoded, options)
}

struct TileJob<'a> {
    source: &'a dyn RasterSource,
    compressor: &'a dyn SampleCompressor,
    quantization: &'a QuantizationParameters,
    stream_params: &'a StreamParams,
}

impl TileJob<'_> {
    fn encode(&self, frame_id: usize, window: &Window) -> Result<Vec<u8>> {
        let block = self
            .source
            .read_window(window)
            .map_err(|err| err.context(format!("tile {frame_id}")))?;
        let samples = self.quantization.quantize_all(&block.interleaved());
        self.compressor
            .compress(&samples, self.stream_params)
            .map_err(|err| {
                TileError::new(TileErrorCode::CompressionFailed, err.to_string())
                    .context(format!("tile {frame_id}"))
            })
    }
}

pub fn decode_tile(
    bytes: &[u8],
    frame: &Frame,
    raster: &RasterInfo,
    compressor: &dyn SampleCompressor,
) -> Result<RasterBlock> {
    let tile = format!("tile {}", frame.frame_id);
    let decoded = compressor
        .decompress(bytes)
        .map_err(|err| err.context(&tile))?;

    if decoded.header.channels != raster.count {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            format!(
                "Stream has {} channels, index declares {} bands.",
                decoded.header.channels, raster.count
            ),
        )
        .context(&tile));
    }
    let expected = frame.window.pixel_count() * u64::from(raster.count);
    if decoded.samples.len() as u64 != expected {
        return Err(TileError::new(
            TileErrorCode::InvalidPayloadLength,
            format!(
                "Stream holds {} samples, window needs {expected}.",
                decoded.samples.len()
            ),
        )
        .context(&tile));
    }

    let cells = raster
        .quantization
        .dequantize_all(&decoded.samples, raster.dtype);
    RasterBlock::from_interleaved(
        frame.window.width,
        frame.window.height,
        usize::from(raster.count),
        &cells,
    )
}
