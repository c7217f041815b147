use std::io::Read;

use crc32fast::hash as crc32;
use flate2::read::DeflateDecoder;

use crate::codec::{DecodedStream, StreamHeader};
use crate::common::{read_packed, read_u32_le, read_u64_le, unwrap_residual};
use crate::consts::{
    HEADER_CHECKSUM_INPUT_LENGTH, HEADER_CHECKSUM_OFFSET, OFFSET_BITS_PER_SAMPLE, OFFSET_CHANNELS,
    OFFSET_COMPRESSED_PAYLOAD_LENGTH, OFFSET_COMPRESSION_LEVEL, OFFSET_FORMAT_MAJOR,
    OFFSET_PAYLOAD_CHECKSUM, OFFSET_SAMPLES_PER_CHANNEL, OFFSET_SAMPLE_RATE,
    OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH, STREAM_FIXED_HEADER_LENGTH, STREAM_MAGIC,
    STREAM_VERSION_MAJOR,
};
use crate::quantize::BitDepth;
use crate::{Result, TileError, TileErrorCode};

#[derive(Debug)]
struct ParsedHeader {
    header: StreamHeader,
    compressed_payload_len: usize,
    uncompressed_payload_len: usize,
}

pub fn inspect_stream(bytes: &[u8]) -> Result<StreamHeader> {
    let parsed = parse_header(bytes)?;
    Ok(parsed.header)
}

pub(crate) fn decode_stream(bytes: &[u8]) -> Result<DecodedStream> {
    let parsed = parse_header(bytes)?;
    let payload_end = STREAM_FIXED_HEADER_LENGTH + parsed.compressed_payload_len;

    let payload = decompress_payload(
        &bytes[STREAM_FIXED_HEADER_LENGTH..payload_end],
        parsed.uncompressed_payload_len,
    )?;
    if payload.len() != parsed.uncompressed_payload_len {
        return Err(TileError::new(
            TileErrorCode::InvalidPayloadLength,
            format!(
                "Uncompressed payload length mismatch. expected={} got={}",
                parsed.uncompressed_payload_len,
                payload.len()
            ),
        ));
    }

    let payload_crc32 = crc32(&payload);
    if payload_crc32 != parsed.header.payload_crc32 {
        return Err(TileError::new(
            TileErrorCode::PayloadChecksumMismatch,
            format!(
                "Payload checksum mismatch. expected={:08x} actual={payload_crc32:08x}",
                parsed.header.payload_crc32
            ),
        ));
    }

    let samples = unpack_and_reconstruct(&payload, &parsed.header);
    Ok(DecodedStream {
        header: parsed.header,
        samples,
    })
}

fn unpack_and_reconstruct(payload: &[u8], header: &StreamHeader) -> Vec<i32> {
    let depth = header.bits_per_sample;
    let channels = usize::from(header.channels);
    let mut previous = vec![0_i32; channels];
    let mut samples = Vec::with_capacity(payload.len() / depth.byte_size());

    for frame in payload.chunks_exact(depth.byte_size() * channels) {
        for (packed, prev) in frame.chunks_exact(depth.byte_size()).zip(previous.iter_mut()) {
            let sample = unwrap_residual(depth, read_packed(depth, packed), *prev);
            samples.push(sample);
            *prev = sample;
        }
    }
    samples
}

fn parse_header(bytes: &[u8]) -> Result<ParsedHeader> {
    if bytes.len() < STREAM_FIXED_HEADER_LENGTH {
        return Err(TileError::new(
            TileErrorCode::InvalidHeaderLength,
            "Stream shorter than fixed header.",
        ));
    }

    if bytes[0..4] != STREAM_MAGIC {
        return Err(TileError::new(
            TileErrorCode::InvalidMagic,
            "Invalid stream magic.",
        ));
    }

    let format_major = bytes[OFFSET_FORMAT_MAJOR];
    if format_major != STREAM_VERSION_MAJOR {
        return Err(TileError::new(
            TileErrorCode::UnsupportedVersion,
            format!("Unsupported major version {format_major}."),
        ));
    }

    let expected_header_crc32 = read_u32_le(bytes, HEADER_CHECKSUM_OFFSET)?;
    let actual_header_crc32 = crc32(&bytes[..HEADER_CHECKSUM_INPUT_LENGTH]);
    if expected_header_crc32 != actual_header_crc32 {
        return Err(TileError::new(
            TileErrorCode::HeaderChecksumMismatch,
            format!(
                "Header checksum mismatch. expected={expected_header_crc32:08x} actual={actual_header_crc32:08x}"
            ),
        ));
    }

    let channels = bytes[OFFSET_CHANNELS];
    if channels == 0 {
        return Err(TileError::new(
            TileErrorCode::InvalidFieldValue,
            "channels must be > 0.",
        ));
    }
    let bits_per_sample = BitDepth::try_from(bytes[OFFSET_BITS_PER_SAMPLE])?;

    let samples_per_channel = read_u64_le(bytes, OFFSET_SAMPLES_PER_CHANNEL)?;
    let uncompressed_payload_u64 = read_u64_le(bytes, OFFSET_UNCOMPRESSED_PAYLOAD_LENGTH)?;
    let compressed_payload_u64 = read_u64_le(bytes, OFFSET_COMPRESSED_PAYLOAD_LENGTH)?;

    let expected_uncompressed = samples_per_channel
        .checked_mul(u64::from(channels))
        .and_then(|n| n.checked_mul(bits_per_sample.byte_size() as u64));
    if expected_uncompressed != Some(uncompressed_payload_u64) {
        return Err(TileError::new(
            TileErrorCode::InvalidPayloadLength,
            format!(
                "Declared payload length {uncompressed_payload_u64} does not match \
                 {samples_per_channel} samples x {channels} channels at {} bits.",
                bits_per_sample.bits()
            ),
        ));
    }

    let uncompressed_payload_len = usize::try_from(uncompressed_payload_u64).map_err(|_| {
        TileError::new(
            TileErrorCode::InvalidHeaderLength,
            "uncompressed payload length exceeds platform usize.",
        )
    })?;
    let compressed_payload_len = usize::try_from(compressed_payload_u64).map_err(|_| {
        TileError::new(
            TileErrorCode::InvalidHeaderLength,
            "compressed payload length exceeds platform usize.",
        )
    })?;

    let payload_end = STREAM_FIXED_HEADER_LENGTH
        .checked_add(compressed_payload_len)
        .ok_or_else(|| {
            TileError::new(
                TileErrorCode::InvalidPayloadLength,
                "Compressed payload length overflow.",
            )
        })?;
    if bytes.len() < payload_end {
        return Err(TileError::new(
            TileErrorCode::InvalidPayloadLength,
            "Stream shorter than declared compressed payload length.",
        ));
    }

    let header = StreamHeader {
        format_major,
        channels,
        bits_per_sample,
        compression_level: bytes[OFFSET_COMPRESSION_LEVEL],
        sample_rate: read_u32_le(bytes, OFFSET_SAMPLE_RATE)?,
        samples_per_channel,
        payload_uncompressed_bytes: uncompressed_payload_u64,
        payload_compressed_bytes: compressed_payload_u64,
        payload_crc32: read_u32_le(bytes, OFFSET_PAYLOAD_CHECKSUM)?,
        header_crc32: expected_header_crc32,
    };

    Ok(ParsedHeader {
        header,
        compressed_payload_len,
        uncompressed_payload_len,
    })
}

// One byte past the declared length is enough to detect an overlong payload.
fn decompress_payload(payload: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let limit = (expected_len as u64).saturating_add(1);
    let mut decoder = DeflateDecoder::new(payload).take(limit);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|err| {
        TileError::new(
            TileErrorCode::DecompressionFailed,
            format!("Could not decompress sample payload: {err}"),
        )
    })?;
    Ok(out)
}
