use std::io::Write;

use crc32fast::hash as crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::codec::{StreamHeader, StreamParams};
use crate::common::{validate_sample_range, wrap_residual, write_packed};
use crate::consts::{
    HEADER_CHECKSUM_INPUT_LENGTH, HEADER_CHECKSUM_OFFSET, MAX_COMPRESSION_LEVEL,
    OFFSET_BITS_PER_SAMPLE, OFFSET_CHANNELS, OFFSET_COMPRESSED_PAYLOAD_LENGTH,
    OFFSET_COMPRESSION_LEVEL, OFFSET_FORMAT_MAJOR, OFFSET_PAYLOAD_CHECKSUM, OFFSET_SAMPLE_RATE,
    OFFSET_SAMPLES_PER_CHANNEL, OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH, STREAM_FIXED_HEADER_LENGTH,
    STREAM_MAGIC, STREAM_VERSION_MAJOR,
};
use crate::{Result, TileError, TileErrorCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodedStream {
    pub bytes: Vec<u8>,
    pub header: StreamHeader,
}

pub(crate) fn encode_stream(samples: &[i32], params: &StreamParams) -> Result<EncodedStream> {
    if params.channels == 0 {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            "channels must be > 0.",
        ));
    }
    if params.compression_level > MAX_COMPRESSION_LEVEL {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            format!(
                "Compression level {} exceeds {MAX_COMPRESSION_LEVEL}.",
                params.compression_level
            ),
        ));
    }

    let channels = usize::from(params.channels);
    if samples.len() % channels != 0 {
        return Err(TileError::new(
            TileErrorCode::InvalidPayloadLength,
            format!(
                "Sample count {} is not divisible by {channels} channels.",
                samples.len()
            ),
        ));
    }

    let payload = predict_and_pack(samples, params)?;
    let payload_crc32 = crc32(&payload);
    let compressed_payload = compress_payload(params.compression_level, &payload)?;
    let samples_per_channel = (samples.len() / channels) as u64;

    let mut header_bytes = [0_u8; STREAM_FIXED_HEADER_LENGTH];
    header_bytes[0..4].copy_from_slice(&STREAM_MAGIC);
    header_bytes[OFFSET_FORMAT_MAJOR] = STREAM_VERSION_MAJOR;
    header_bytes[OFFSET_CHANNELS] = params.channels;
    header_bytes[OFFSET_BITS_PER_SAMPLE] = u8::from(params.bits_per_sample);
    header_bytes[OFFSET_COMPRESSION_LEVEL] = params.compression_level;
    header_bytes[OFFSET_SAMPLE_RATE..OFFSET_SAMPLE_RATE + 4]
        .copy_from_slice(&params.sample_rate.to_le_bytes());
    header_bytes[OFFSET_SAMPLES_PER_CHANNEL..OFFSET_SAMPLES_PER_CHANNEL + 8]
        .copy_from_slice(&samples_per_channel.to_le_bytes());
    header_bytes[OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH..OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH + 8]
        .copy_from_slice(&(payload.len() as u64).to_le_bytes());
    header_bytes[OFFSET_COMPRESSED_PAYLOAD_LENGTH..OFFSET_COMPRESSED_PAYLOAD_LENGTH + 8]
        .copy_from_slice(&(compressed_payload.len() as u64).to_le_bytes());
    header_bytes[OFFSET_PAYLOAD_CHECKSUM..OFFSET_PAYLOAD_CHECKSUM + 4]
        .copy_from_slice(&payload_crc32.to_le_bytes());

    let header_crc32 = crc32(&header_bytes[..HEADER_CHECKSUM_INPUT_LENGTH]);
    header_bytes[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4]
        .copy_from_slice(&header_crc32.to_le_bytes());

    let mut bytes = Vec::with_capacity(STREAM_FIXED_HEADER_LENGTH + compressed_payload.len());
    bytes.extend_from_slice(&header_bytes);
    bytes.extend_from_slice(&compressed_payload);

    let header = StreamHeader {
        format_major: STREAM_VERSION_MAJOR,
        channels: params.channels,
        bits_per_sample: params.bits_per_sample,
        compression_level: params.compression_level,
        sample_rate: params.sample_rate,
        samples_per_channel,
        payload_uncompressed_bytes: payload.len() as u64,
        payload_compressed_bytes: compressed_payload.len() as u64,
        payload_crc32,
        header_crc32,
    };

    Ok(EncodedStream { bytes, header })
}

fn predict_and_pack(samples: &[i32], params: &StreamParams) -> Result<Vec<u8>> {
    let depth = params.bits_per_sample;
    let channels = usize::from(params.channels);
    let mut previous = vec![0_i32; channels];
    let mut out = Vec::with_capacity(samples.len() * depth.byte_size());

    for frame in samples.chunks_exact(channels) {
        for (sample, prev) in frame.iter().zip(previous.iter_mut()) {
            validate_sample_range(depth, *sample)?;
            write_packed(depth, wrap_residual(depth, *sample, *prev), &mut out);
            *prev = *sample;
        }
    }
    Ok(out)
}

fn compress_payload(level: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(u32::from(level)));
    encoder.write_all(payload).map_err(|err| {
        TileError::new(
            TileErrorCode::CompressionFailed,
            format!("Could not compress sample payload: {err}"),
        )
    })?;
    encoder.finish().map_err(|err| {
        TileError::new(
            TileErrorCode::CompressionFailed,
            format!("Could not finish sample payload compression: {err}"),
        )
    })
}
