pub const STREAM_FIXED_HEADER_LENGTH: usize = 44;
pub const STREAM_VERSION_MAJOR: u8 = 1;

pub const DEFAULT_TILE_SIZE: u32 = 512;
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;
pub const MAX_COMPRESSION_LEVEL: u8 = 8;
pub const DEFAULT_METADATA_FETCH_LEN: usize = 1024 * 1024;

pub(crate) const STREAM_MAGIC: [u8; 4] = *b"RTS1";
pub(crate) const HEADER_CHECKSUM_OFFSET: usize = 40;
pub(crate) const HEADER_CHECKSUM_INPUT_LENGTH: usize = HEADER_CHECKSUM_OFFSET;

pub(crate) const OFFSET_FORMAT_MAJOR: usize = 4;
pub(crate) const OFFSET_CHANNELS: usize = 5;
pub(crate) const OFFSET_BITS_PER_SAMPLE: usize = 6;
pub(crate) const OFFSET_COMPRESSION_LEVEL: usize = 7;
pub(crate) const OFFSET_SAMPLE_RATE: usize = 8;
pub(crate) const OFFSET_SAMPLES_PER_CHANNEL: usize = 12;
pub(crate) const OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH: usize = 20;
pub(crate) const OFFSET_COMPRESSED_PAYLOAD_LENGTH: usize = 28;
pub(crate) const OFFSET_PAYLOAD_CHECKSUM: usize = 36;

pub(crate) const TAG_MAGIC: [u8; 4] = *b"RTAG";
pub(crate) const TAG_PREAMBLE_LENGTH: usize = 8;
pub(crate) const LENGTH_PREFIX_BYTES: usize = 4;

pub(crate) const SIDECAR_EXTENSION: &str = "spatial.json";

pub(crate) const FULL_SCALE_16: f64 = 32767.0;
pub(crate) const FULL_SCALE_24: f64 = 8388607.0;

pub(crate) const SAMPLE_RATE_THRESHOLDS: [(u64, u32); 3] =
    [(1_000_000, 44_100), (10_000_000, 48_000), (100_000_000, 96_000)];
pub(crate) const SAMPLE_RATE_MAX: u32 = 192_000;

pub(crate) const ENCODER_NAME: &str = concat!("rangetile ", env!("CARGO_PKG_VERSION"));

pub(crate) const KEY_ENCODER: &str = "ENCODER";
pub(crate) const KEY_CRS: &str = "GEOSPATIAL_CRS";
pub(crate) const KEY_WIDTH: &str = "GEOSPATIAL_WIDTH";
pub(crate) const KEY_HEIGHT: &str = "GEOSPATIAL_HEIGHT";
pub(crate) const KEY_COUNT: &str = "GEOSPATIAL_COUNT";
pub(crate) const KEY_DTYPE: &str = "GEOSPATIAL_DTYPE";
pub(crate) const KEY_DATA_MIN: &str = "GEOSPATIAL_DATA_MIN";
pub(crate) const KEY_DATA_MAX: &str = "GEOSPATIAL_DATA_MAX";
pub(crate) const KEY_TRANSFORM: &str = "GEOSPATIAL_TRANSFORM";
pub(crate) const KEY_BOUNDS: &str = "GEOSPATIAL_BOUNDS";
pub(crate) const KEY_SPATIAL_TILING: &str = "GEOSPATIAL_SPATIAL_TILING";
pub(crate) const KEY_TILE_SIZE: &str = "GEOSPATIAL_TILE_SIZE";
pub(crate) const KEY_NUM_TILES: &str = "GEOSPATIAL_NUM_TILES";
pub(crate) const KEY_BITS_PER_SAMPLE: &str = "GEOSPATIAL_BITS_PER_SAMPLE";
pub(crate) const KEY_SAMPLE_RATE: &str = "GEOSPATIAL_SAMPLE_RATE";
pub(crate) const KEY_SPATIAL_INDEX: &str = "GEOSPATIAL_SPATIAL_INDEX";
