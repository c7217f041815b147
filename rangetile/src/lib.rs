use std::fmt;

use serde::{Deserialize, Serialize};

mod common;
mod consts;
mod decoder;
mod encoder;

pub mod codec;
pub mod compare;
pub mod config;
pub mod container;
pub mod geometry;
pub mod index;
pub mod planner;
pub mod quantize;
pub mod query;
pub mod raster;
pub mod reader;
pub mod source;
pub mod tags;
pub mod tiling;

pub use codec::{DecodedStream, DeflateStreamCodec, SampleCompressor, StreamHeader, StreamParams};
pub use compare::{compare_blocks, BandComparison, BlockComparison, DifferenceStats};
pub use config::{EncodeOptions, ReaderOptions};
pub use consts::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_METADATA_FETCH_LEN, DEFAULT_TILE_SIZE,
    STREAM_FIXED_HEADER_LENGTH, STREAM_VERSION_MAJOR,
};
pub use container::{
    encode_container, load_index, sidecar_path, write_container, ContainerBytes, Framing,
    LoadedIndex,
};
pub use decoder::inspect_stream;
pub use geometry::{Affine, BBox, Window};
pub use index::{Frame, RasterInfo, SpatialIndex};
pub use planner::plan_tiles;
pub use quantize::{BitDepth, QuantizationParameters};
pub use query::{merge_ranges, ByteRange};
pub use raster::{MemoryRaster, RasterAttributes, RasterBlock, RasterSource};
pub use reader::{ContainerReader, DecodedTile, TilePayload};
pub use source::{open_source, HttpRangeReader, LocalRangeReader, RangeReader};
pub use tags::{ContainerSummary, TagBlock};
pub use tiling::{decode_tile, encode_raster, encode_to_path, EncodeContext, EncodedRaster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "uint8" => Ok(Self::Uint8),
            "int8" => Ok(Self::Int8),
            "uint16" => Ok(Self::Uint16),
            "int16" => Ok(Self::Int16),
            "uint32" => Ok(Self::Uint32),
            "int32" => Ok(Self::Int32),
            "uint64" => Ok(Self::Uint64),
            "int64" => Ok(Self::Int64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(TileError::new(
                TileErrorCode::InvalidFieldValue,
                format!("Unknown cell datatype {other:?}."),
            )),
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileErrorCode {
    ConfigurationError,
    SourceUnavailable,
    IndexNotFound,
    RangeUnsupported,
    InvalidMagic,
    UnsupportedVersion,
    InvalidHeaderLength,
    InvalidFieldValue,
    MissingRequiredField,
    InvalidIndex,
    HeaderChecksumMismatch,
    InvalidPayloadLength,
    CompressionFailed,
    DecompressionFailed,
    PayloadChecksumMismatch,
}

impl TileErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::IndexNotFound => "INDEX_NOT_FOUND",
            Self::RangeUnsupported => "RANGE_UNSUPPORTED",
            Self::InvalidMagic => "INVALID_MAGIC",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InvalidHeaderLength => "INVALID_HEADER_LENGTH",
            Self::InvalidFieldValue => "INVALID_FIELD_VALUE",
            Self::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            Self::InvalidIndex => "INVALID_INDEX",
            Self::HeaderChecksumMismatch => "HEADER_CHECKSUM_MISMATCH",
            Self::InvalidPayloadLength => "INVALID_PAYLOAD_LENGTH",
            Self::CompressionFailed => "COMPRESSION_FAILED",
            Self::DecompressionFailed => "DECOMPRESSION_FAILED",
            Self::PayloadChecksumMismatch => "PAYLOAD_CHECKSUM_MISMATCH",
        }
    }
}

impl fmt::Display for TileErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TileError {
    pub code: TileErrorCode,
    pub message: String,
}

impl TileError {
    pub fn new(code: TileErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Prefixes the message with where the failure happened (tile, range, path).
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}

pub type Result<T> = std::result::Result<T, TileError>;
