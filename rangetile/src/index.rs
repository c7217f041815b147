use serde::{Deserialize, Serialize};

use crate::geometry::{Affine, BBox, Window};
use crate::quantize::QuantizationParameters;
use crate::{DType, Result, TileError, TileErrorCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: u32,
    pub bbox: BBox,
    pub window: Window,
    /// Relative to the start of the payload region.
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl Frame {
    pub fn byte_end(&self) -> Option<u64> {
        (self.byte_size > 0).then(|| self.byte_offset + self.byte_size - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub count: u8,
    pub dtype: DType,
    pub quantization: QuantizationParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialIndex {
    crs: String,
    transform: Affine,
    width: u32,
    height: u32,
    tile_size: u32,
    frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raster: Option<RasterInfo>,
}

impl SpatialIndex {
    pub fn new(
        crs: impl Into<String>,
        transform: Affine,
        width: u32,
        height: u32,
        tile_size: u32,
        frames: Vec<Frame>,
        raster: Option<RasterInfo>,
    ) -> Result<Self> {
        let index = Self {
            crs: crs.into(),
            transform,
            width,
            height,
            tile_size,
            frames,
            raster,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn transform(&self) -> &Affine {
        &self.transform
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, frame_id: u32) -> Option<&Frame> {
        self.frames.get(frame_id as usize)
    }

    pub fn raster(&self) -> Option<&RasterInfo> {
        self.raster.as_ref()
    }

    pub fn total_bytes(&self) -> u64 {
        self.frames.iter().map(|frame| frame.byte_size).sum()
    }

    pub fn extent(&self) -> Option<BBox> {
        self.frames
            .iter()
            .map(|frame| frame.bbox)
            .reduce(|acc, bbox| acc.union(&bbox))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| {
            TileError::new(
                TileErrorCode::InvalidIndex,
                format!("Could not serialize spatial index: {err}"),
            )
        })
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| {
            TileError::new(
                TileErrorCode::InvalidIndex,
                format!("Could not serialize spatial index: {err}"),
            )
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let index: Self = serde_json::from_slice(bytes).map_err(|err| {
            TileError::new(
                TileErrorCode::InvalidIndex,
                format!("Could not parse spatial index JSON: {err}"),
            )
        })?;
        index.validate()?;
        Ok(index)
    }

    fn validate(&self) -> Result<()> {
        let mut expected_offset = 0_u64;
        for (position, frame) in self.frames.iter().enumerate() {
            if frame.frame_id as usize != position {
                return Err(TileError::new(
                    TileErrorCode::InvalidIndex,
                    format!(
                        "Frame at position {position} has frame_id {}.",
                        frame.frame_id
                    ),
                ));
            }
            if frame.byte_offset != expected_offset {
                return Err(TileError::new(
                    TileErrorCode::InvalidIndex,
                    format!(
                        "Frame {} starts at byte {}, expected {expected_offset}.",
                        frame.frame_id, frame.byte_offset
                    ),
                ));
            }
            expected_offset = expected_offset.checked_add(frame.byte_size).ok_or_else(|| {
                TileError::new(
                    TileErrorCode::InvalidIndex,
                    format!("Frame {} overflows the payload region.", frame.frame_id),
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn frames_with_sizes(sizes: &[u64]) -> Vec<Frame> {
        let mut offset = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let col = i as u32 % 2;
                let row = i as u32 / 2;
                let frame = Frame {
                    frame_id: i as u32,
                    bbox: BBox::new(
                        f64::from(col),
                        -f64::from(row + 1),
                        f64::from(col + 1),
                        -f64::from(row),
                    ),
                    window: Window::new(col * 4, row * 4, 4, 4),
                    byte_offset: offset,
                    byte_size: *size,
                };
                offset += size;
                frame
            })
            .collect()
    }

    pub(crate) fn index_with_sizes(sizes: &[u64]) -> SpatialIndex {
        let rows = sizes.len().div_ceil(2) as u32;
        SpatialIndex::new(
            "EPSG:4326",
            Affine::new(0.25, 0.0, 0.0, 0.0, -0.25, 0.0),
            8,
            rows * 4,
            4,
            frames_with_sizes(sizes),
            None,
        )
        .expect("build index")
    }

    #[test]
    fn offsets_are_cumulative_and_total_is_derived() {
        let index = index_with_sizes(&[10, 0, 7, 3]);
        let mut running = 0;
        for frame in index.frames() {
            assert_eq!(frame.byte_offset, running);
            running += frame.byte_size;
        }
        assert_eq!(index.total_bytes(), 20);
        assert_eq!(index.frame(1).and_then(Frame::byte_end), None);
        assert_eq!(index.frame(2).and_then(Frame::byte_end), Some(16));
    }

    #[test]
    fn json_uses_documented_schema() {
        let index = index_with_sizes(&[5, 6]);
        let value: serde_json::Value =
            serde_json::from_slice(&index.to_json().expect("serialize")).expect("parse json");
        assert_eq!(value["crs"], "EPSG:4326");
        assert_eq!(value["transform"].as_array().map(Vec::len), Some(6));
        assert_eq!(value["tile_size"], 4);
        let frame = &value["frames"][1];
        assert_eq!(frame["frame_id"], 1);
        assert_eq!(frame["bbox"].as_array().map(Vec::len), Some(4));
        assert_eq!(frame["window"]["col_off"], 4);
        assert_eq!(frame["byte_offset"], 5);
        assert_eq!(frame["byte_size"], 6);
        assert!(value.get("raster").is_none());

        let parsed = SpatialIndex::from_json(&index.to_json_pretty().expect("pretty"))
            .expect("parse index");
        assert_eq!(parsed, index);
    }

    #[test]
    fn rejects_gapped_offsets() {
        let mut frames = frames_with_sizes(&[5, 6]);
        frames[1].byte_offset = 6;
        let err = SpatialIndex::new("", Affine::identity(), 8, 4, 4, frames, None)
            .expect_err("gap between frames");
        assert_eq!(err.code, TileErrorCode::InvalidIndex);
    }

    #[test]
    fn rejects_sparse_frame_ids() {
        let mut frames = frames_with_sizes(&[5, 6]);
        frames[1].frame_id = 7;
        let err = SpatialIndex::new("", Affine::identity(), 8, 4, 4, frames, None)
            .expect_err("sparse ids");
        assert_eq!(err.code, TileErrorCode::InvalidIndex);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SpatialIndex::from_json(b"{\"crs\": 1}").expect_err("bad json");
        assert_eq!(err.code, TileErrorCode::InvalidIndex);
    }

    #[test]
    fn extent_covers_all_frames() {
        let index = index_with_sizes(&[1, 1, 1, 1]);
        assert_eq!(index.extent(), Some(BBox::new(0.0, -2.0, 2.0, 0.0)));
    }
}
