use log::trace;

use crate::decoder::decode_stream;
use crate::encoder::encode_stream;
use crate::quantize::BitDepth;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: BitDepth,
    pub compression_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub format_major: u8,
    pub channels: u8,
    pub bits_per_sample: BitDepth,
    pub compression_level: u8,
    pub sample_rate: u32,
    pub samples_per_channel: u64,
    pub payload_uncompressed_bytes: u64,
    pub payload_compressed_bytes: u64,
    pub payload_crc32: u32,
    pub header_crc32: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStream {
    pub header: StreamHeader,
    pub samples: Vec<i32>,
}

pub trait SampleCompressor: Send + Sync {
    fn compress(&self, samples: &[i32], params: &StreamParams) -> Result<Vec<u8>>;

    fn decompress(&self, bytes: &[u8]) -> Result<DecodedStream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateStreamCodec;

impl SampleCompressor for DeflateStreamCodec {
    fn compress(&self, samples: &[i32], params: &StreamParams) -> Result<Vec<u8>> {
        let encoded = encode_stream(samples, params)?;
        trace!(
            "Packed {} samples/channel: {} -> {} payload bytes",
            encoded.header.samples_per_channel,
            encoded.header.payload_uncompressed_bytes,
            encoded.header.payload_compressed_bytes
        );
        Ok(encoded.bytes)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<DecodedStream> {
        decode_stream(bytes)
    }
}
