//! Text metadata block carried at the front of embedded-framing containers.
//!
//! Layout: `RTAG`, a big-endian u32 body length, then a little-endian u32
//! entry count followed by length-prefixed `KEY=value` UTF-8 entries.

use crate::common::{read_u32_be, read_u32_le};
use crate::consts::{
    KEY_BITS_PER_SAMPLE, KEY_BOUNDS, KEY_COUNT, KEY_CRS, KEY_DATA_MAX, KEY_DATA_MIN, KEY_DTYPE,
    KEY_HEIGHT, KEY_NUM_TILES, KEY_SAMPLE_RATE, KEY_SPATIAL_TILING, KEY_TILE_SIZE, KEY_TRANSFORM,
    KEY_WIDTH, TAG_MAGIC, TAG_PREAMBLE_LENGTH,
};
use crate::geometry::{Affine, BBox};
use crate::index::SpatialIndex;
use crate::quantize::BitDepth;
use crate::{DType, Result, TileError, TileErrorCode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagBlock {
    entries: Vec<(String, String)>,
}

impl TagBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_ascii_uppercase(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&u32_len(self.entries.len(), "tag count")?.to_le_bytes());
        for (key, value) in &self.entries {
            if key.is_empty() || key.contains('=') {
                return Err(TileError::new(
                    TileErrorCode::InvalidFieldValue,
                    format!("Invalid tag key {key:?}."),
                ));
            }
            let entry = format!("{key}={value}");
            body.extend_from_slice(&u32_len(entry.len(), "tag entry")?.to_le_bytes());
            body.extend_from_slice(entry.as_bytes());
        }

        let mut out = Vec::with_capacity(TAG_PREAMBLE_LENGTH + body.len());
        out.extend_from_slice(&TAG_MAGIC);
        out.extend_from_slice(&u32_len(body.len(), "tag block")?.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn declared_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < TAG_PREAMBLE_LENGTH || prefix[0..4] != TAG_MAGIC {
            return None;
        }
        let body_len = read_u32_be(prefix, 4).ok()?;
        TAG_PREAMBLE_LENGTH.checked_add(body_len as usize)
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < TAG_PREAMBLE_LENGTH || bytes[0..4] != TAG_MAGIC {
            return Err(TileError::new(
                TileErrorCode::InvalidMagic,
                "Missing tag block magic.",
            ));
        }
        let total = Self::declared_len(bytes).unwrap_or(usize::MAX);
        if bytes.len() < total {
            return Err(TileError::new(
                TileErrorCode::InvalidHeaderLength,
                format!(
                    "Tag block declares {total} bytes, only {} available.",
                    bytes.len()
                ),
            ));
        }

        let body = &bytes[TAG_PREAMBLE_LENGTH..total];
        let count = read_u32_le(body, 0)? as usize;
        let mut cursor = 4;
        let mut block = Self::new();
        for _ in 0..count {
            let len = read_u32_le(body, cursor)? as usize;
            cursor += 4;
            let raw = body.get(cursor..cursor + len).ok_or_else(|| {
                TileError::new(
                    TileErrorCode::InvalidHeaderLength,
                    "Tag entry runs past the end of the block.",
                )
            })?;
            cursor += len;
            let entry = std::str::from_utf8(raw).map_err(|_| {
                TileError::new(TileErrorCode::InvalidFieldValue, "Tag entry is not UTF-8.")
            })?;
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                TileError::new(
                    TileErrorCode::InvalidFieldValue,
                    format!("Tag entry {entry:?} has no '='."),
                )
            })?;
            block.entries.push((key.to_string(), value.to_string()));
        }
        Ok((block, total))
    }
}

fn u32_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        TileError::new(
            TileErrorCode::InvalidPayloadLength,
            format!("{what} length {len} exceeds u32."),
        )
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub crs: String,
    pub width: u32,
    pub height: u32,
    pub count: u8,
    pub dtype: DType,
    pub data_min: f64,
    pub data_max: f64,
    pub spatial_tiling: bool,
    pub tile_size: u32,
    pub num_tiles: usize,
    pub bits_per_sample: Option<BitDepth>,
    pub sample_rate: Option<u32>,
    pub transform: Option<Affine>,
    pub bounds: Option<BBox>,
}

impl ContainerSummary {
    pub fn from_index(index: &SpatialIndex, spatial_tiling: bool) -> Result<Self> {
        let raster = index.raster().ok_or_else(|| {
            TileError::new(
                TileErrorCode::MissingRequiredField,
                "Spatial index carries no raster info.",
            )
        })?;
        Ok(Self {
            crs: index.crs().to_string(),
            width: index.width(),
            height: index.height(),
            count: raster.count,
            dtype: raster.dtype,
            data_min: raster.quantization.data_min,
            data_max: raster.quantization.data_max,
            spatial_tiling,
            tile_size: index.tile_size(),
            num_tiles: index.frames().len(),
            bits_per_sample: Some(raster.quantization.bits_per_sample),
            sample_rate: Some(raster.quantization.sample_rate),
            transform: Some(*index.transform()),
            bounds: index.extent(),
        })
    }

    pub fn write_tags(&self, tags: &mut TagBlock) -> Result<()> {
        tags.set(KEY_CRS, self.crs.as_str());
        tags.set(KEY_WIDTH, self.width.to_string());
        tags.set(KEY_HEIGHT, self.height.to_string());
        tags.set(KEY_COUNT, self.count.to_string());
        tags.set(KEY_DTYPE, self.dtype.name());
        tags.set(KEY_DATA_MIN, self.data_min.to_string());
        tags.set(KEY_DATA_MAX, self.data_max.to_string());
        tags.set(KEY_SPATIAL_TILING, self.spatial_tiling.to_string());
        tags.set(KEY_TILE_SIZE, self.tile_size.to_string());
        tags.set(KEY_NUM_TILES, self.num_tiles.to_string());
        if let Some(bits) = self.bits_per_sample {
            tags.set(KEY_BITS_PER_SAMPLE, bits.bits().to_string());
        }
        if let Some(rate) = self.sample_rate {
            tags.set(KEY_SAMPLE_RATE, rate.to_string());
        }
        if let Some(transform) = self.transform {
            tags.set(KEY_TRANSFORM, to_json_text(&transform)?);
        }
        if let Some(bounds) = self.bounds {
            tags.set(KEY_BOUNDS, to_json_text(&bounds)?);
        }
        Ok(())
    }

    pub fn from_tags(tags: &TagBlock) -> Result<Self> {
        let bits_per_sample = optional::<u8>(tags, KEY_BITS_PER_SAMPLE)?
            .map(BitDepth::try_from)
            .transpose()?;
        Ok(Self {
            crs: required(tags, KEY_CRS)?.to_string(),
            width: parse_field(tags, KEY_WIDTH)?,
            height: parse_field(tags, KEY_HEIGHT)?,
            count: parse_field(tags, KEY_COUNT)?,
            dtype: DType::from_name(required(tags, KEY_DTYPE)?)?,
            data_min: parse_field(tags, KEY_DATA_MIN)?,
            data_max: parse_field(tags, KEY_DATA_MAX)?,
            spatial_tiling: required(tags, KEY_SPATIAL_TILING)?.eq_ignore_ascii_case("true"),
            tile_size: parse_field(tags, KEY_TILE_SIZE)?,
            num_tiles: parse_field(tags, KEY_NUM_TILES)?,
            bits_per_sample,
            sample_rate: optional(tags, KEY_SAMPLE_RATE)?,
            transform: optional_json(tags, KEY_TRANSFORM)?,
            bounds: optional_json(tags, KEY_BOUNDS)?,
        })
    }
}

fn required<'a>(tags: &'a TagBlock, key: &str) -> Result<&'a str> {
    tags.get(key).ok_or_else(|| {
        TileError::new(
            TileErrorCode::MissingRequiredField,
            format!("Tag {key} is missing."),
        )
    })
}

fn parse_field<T: std::str::FromStr>(tags: &TagBlock, key: &str) -> Result<T> {
    let raw = required(tags, key)?;
    raw.trim().parse().map_err(|_| {
        TileError::new(
            TileErrorCode::InvalidFieldValue,
            format!("Tag {key} has unparsable value {raw:?}."),
        )
    })
}

fn optional<T: std::str::FromStr>(tags: &TagBlock, key: &str) -> Result<Option<T>> {
    match tags.get(key) {
        Some(_) => parse_field(tags, key).map(Some),
        None => Ok(None),
    }
}

fn optional_json<T: serde::de::DeserializeOwned>(tags: &TagBlock, key: &str) -> Result<Option<T>> {
    tags.get(key)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|err| {
                TileError::new(
                    TileErrorCode::InvalidFieldValue,
                    format!("Tag {key} is not valid JSON: {err}"),
                )
            })
        })
        .transpose()
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| {
        TileError::new(
            TileErrorCode::InvalidFieldValue,
            format!("Could not serialize tag value: {err}"),
        )
    })
}
