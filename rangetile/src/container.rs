use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::common::read_u32_be;
use crate::config::EncodeOptions;
use crate::consts::{
    ENCODER_NAME, KEY_ENCODER, KEY_SPATIAL_INDEX, LENGTH_PREFIX_BYTES, SIDECAR_EXTENSION,
};
use crate::index::SpatialIndex;
use crate::source::RangeReader;
use crate::tags::{ContainerSummary, TagBlock};
use crate::tiling::EncodedRaster;
use crate::{Result, TileError, TileErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    Embedded,
    LengthPrefixed,
    Sidecar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBytes {
    pub bytes: Vec<u8>,
    pub sidecar: Option<Vec<u8>>,
    pub framing: Framing,
    pub payload_start: u64,
}

pub fn encode_container(encoded: &EncodedRaster, options: &EncodeOptions) -> Result<ContainerBytes> {
    let index = &encoded.index;
    match options.framing {
        Framing::Embedded => {
            let block = embedded_tag_block(index, options.spatial_tiling)?.encode()?;
            if block.len() > options.max_embedded_metadata_len {
                warn!(
                    "Embedded metadata is {} bytes, over the {} byte budget; writing a sidecar index instead",
                    block.len(),
                    options.max_embedded_metadata_len
                );
                return sidecar_container(encoded);
            }
            let payload_start = block.len() as u64;
            let mut bytes = block;
            bytes.extend_from_slice(&encoded.payload);
            Ok(ContainerBytes {
                bytes,
                sidecar: None,
                framing: Framing::Embedded,
                payload_start,
            })
        }
        Framing::LengthPrefixed => {
            let json = index.to_json()?;
            let len = u32::try_from(json.len()).map_err(|_| {
                TileError::new(
                    TileErrorCode::InvalidIndex,
                    format!("Index JSON of {} bytes does not fit a u32 prefix.", json.len()),
                )
            })?;
            let mut bytes =
                Vec::with_capacity(LENGTH_PREFIX_BYTES + json.len() + encoded.payload.len());
            bytes.extend_from_slice(&len.to_be_bytes());
            bytes.extend_from_slice(&json);
            bytes.extend_from_slice(&encoded.payload);
            Ok(ContainerBytes {
                bytes,
                sidecar: None,
                framing: Framing::LengthPrefixed,
                payload_start: (LENGTH_PREFIX_BYTES + json.len()) as u64,
            })
        }
        Framing::Sidecar => sidecar_container(encoded),
    }
}

fn sidecar_container(encoded: &EncodedRaster) -> Result<ContainerBytes> {
    Ok(ContainerBytes {
        bytes: encoded.payload.clone(),
        sidecar: Some(encoded.index.to_json_pretty()?),
        framing: Framing::Sidecar,
        payload_start: 0,
    })
}

fn embedded_tag_block(index: &SpatialIndex, spatial_tiling: bool) -> Result<TagBlock> {
    let mut tags = TagBlock::new();
    tags.set(KEY_ENCODER, ENCODER_NAME);
    ContainerSummary::from_index(index, spatial_tiling)?.write_tags(&mut tags)?;
    tags.set(KEY_SPATIAL_INDEX, pack_index(index)?);
    Ok(tags)
}

fn pack_index(index: &SpatialIndex) -> Result<String> {
    let json = index.to_json()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|()| encoder.finish())
        .map(|gz| STANDARD.encode(gz))
        .map_err(|err| {
            TileError::new(
                TileErrorCode::CompressionFailed,
                format!("Could not gzip spatial index: {err}"),
            )
        })
}

fn unpack_index(text: &str) -> Result<SpatialIndex> {
    let gz = STANDARD.decode(text.trim()).map_err(|err| {
        TileError::new(
            TileErrorCode::InvalidIndex,
            format!("Embedded index is not base64: {err}"),
        )
    })?;
    let mut json = Vec::new();
    GzDecoder::new(gz.as_slice())
        .read_to_end(&mut json)
        .map_err(|err| {
            TileError::new(
                TileErrorCode::DecompressionFailed,
                format!("Could not gunzip embedded index: {err}"),
            )
        })?;
    SpatialIndex::from_json(&json)
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension(SIDECAR_EXTENSION)
}

pub fn write_container(path: &Path, encoded: &EncodedRaster, options: &EncodeOptions) -> Result<Framing> {
    let container = encode_container(encoded, options)?;
    let write_failed = |target: &Path, err: std::io::Error| {
        TileError::new(
            TileErrorCode::SourceUnavailable,
            format!("Could not write: {err}"),
        )
        .context(target.display())
    };
    if let Some(sidecar) = &container.sidecar {
        let target = sidecar_path(path);
        fs::write(&target, sidecar).map_err(|err| write_failed(&target, err))?;
    }
    fs::write(path, &container.bytes).map_err(|err| write_failed(path, err))?;
    info!(
        "Wrote {} ({:?} framing, {} bytes, {} tiles)",
        path.display(),
        container.framing,
        container.bytes.len(),
        encoded.index.frames().len()
    );
    Ok(container.framing)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedIndex {
    pub index: SpatialIndex,
    pub payload_start: u64,
    pub framing: Framing,
    pub tags: Option<TagBlock>,
}

type Loader = fn(&dyn RangeReader, &[u8]) -> Result<Option<LoadedIndex>>;

const LOADERS: [(Framing, Loader); 3] = [
    (Framing::Embedded, load_embedded),
    (Framing::LengthPrefixed, load_length_prefixed),
    (Framing::Sidecar, load_sidecar),
];

/// Tries embedded, length-prefixed, then sidecar framing on the first
/// `prefix_len` bytes of `reader`. Transport errors propagate; a framing that
/// is absent or does not parse hands over to the next one. A sidecar index
/// addresses the tail of the file.
pub fn load_index(reader: &dyn RangeReader, prefix_len: usize) -> Result<LoadedIndex> {
    let fetch = reader.size().min(prefix_len as u64) as usize;
    let prefix = reader.read_range(0, fetch)?;
    debug!("Probing {} with a {fetch} byte prefix", reader.identifier());

    for (framing, loader) in LOADERS {
        match loader(reader, &prefix)? {
            Some(loaded) => {
                info!(
                    "Loaded {framing:?} index from {}: {} tiles",
                    reader.identifier(),
                    loaded.index.frames().len()
                );
                return Ok(loaded);
            }
            None => debug!("No {framing:?} index in {}", reader.identifier()),
        }
    }
    Err(TileError::new(
        TileErrorCode::IndexNotFound,
        "No embedded, length-prefixed or sidecar index found.",
    )
    .context(reader.identifier()))
}

fn load_embedded(reader: &dyn RangeReader, prefix: &[u8]) -> Result<Option<LoadedIndex>> {
    let Some(declared) = TagBlock::declared_len(prefix) else {
        return Ok(None);
    };
    if declared as u64 > reader.size() {
        warn!(
            "{}: tag block declares {declared} bytes, past the end of the file",
            reader.identifier()
        );
        return Ok(None);
    }
    let fetched;
    let block_bytes = if declared <= prefix.len() {
        prefix
    } else {
        debug!(
            "{}: tag block is {declared} bytes, fetching past the prefix",
            reader.identifier()
        );
        fetched = reader.read_range(0, declared)?;
        &fetched[..]
    };

    let parsed = TagBlock::decode(block_bytes).and_then(|(tags, len)| {
        let text = tags.get(KEY_SPATIAL_INDEX).ok_or_else(|| {
            TileError::new(
                TileErrorCode::MissingRequiredField,
                format!("Tag block has no {KEY_SPATIAL_INDEX}."),
            )
        })?;
        let index = unpack_index(text)?;
        Ok((tags, len, index))
    });
    match parsed {
        Ok((tags, len, index)) => Ok(checked(
            reader,
            LoadedIndex {
                index,
                payload_start: len as u64,
                framing: Framing::Embedded,
                tags: Some(tags),
            },
        )),
        Err(err) => {
            warn!("{}: unusable embedded index: {err}", reader.identifier());
            Ok(None)
        }
    }
}

fn load_length_prefixed(reader: &dyn RangeReader, prefix: &[u8]) -> Result<Option<LoadedIndex>> {
    let Ok(json_len) = read_u32_be(prefix, 0) else {
        return Ok(None);
    };
    let json_len = json_len as usize;
    let payload_start = (LENGTH_PREFIX_BYTES + json_len) as u64;
    let looks_like_json = prefix.get(LENGTH_PREFIX_BYTES) == Some(&b'{');
    if json_len == 0 || !looks_like_json || payload_start > reader.size() {
        return Ok(None);
    }

    let fetched;
    let json = match prefix.get(LENGTH_PREFIX_BYTES..LENGTH_PREFIX_BYTES + json_len) {
        Some(json) => json,
        None => {
            fetched = reader.read_range(LENGTH_PREFIX_BYTES as u64, json_len)?;
            &fetched[..]
        }
    };
    match SpatialIndex::from_json(json) {
        Ok(index) => Ok(checked(
            reader,
            LoadedIndex {
                index,
                payload_start,
                framing: Framing::LengthPrefixed,
                tags: None,
            },
        )),
        Err(err) => {
            warn!("{}: unusable length-prefixed index: {err}", reader.identifier());
            Ok(None)
        }
    }
}

fn load_sidecar(reader: &dyn RangeReader, _prefix: &[u8]) -> Result<Option<LoadedIndex>> {
    let Some(json) = reader.read_companion(SIDECAR_EXTENSION)? else {
        return Ok(None);
    };
    let index = match SpatialIndex::from_json(&json) {
        Ok(index) => index,
        Err(err) => {
            warn!("{}: unusable sidecar index: {err}", reader.identifier());
            return Ok(None);
        }
    };
    // The payload region is the tail of the file, whatever precedes it.
    let Some(payload_start) = reader.size().checked_sub(index.total_bytes()) else {
        warn!(
            "{}: sidecar index addresses {} bytes, file holds {}",
            reader.identifier(),
            index.total_bytes(),
            reader.size()
        );
        return Ok(None);
    };
    if payload_start > 0 {
        debug!(
            "{}: sidecar payload starts after a {payload_start} byte preamble",
            reader.identifier()
        );
    }
    Ok(checked(
        reader,
        LoadedIndex {
            index,
            payload_start,
            framing: Framing::Sidecar,
            tags: None,
        },
    ))
}

fn checked(reader: &dyn RangeReader, loaded: LoadedIndex) -> Option<LoadedIndex> {
    let end = loaded.payload_start.checked_add(loaded.index.total_bytes());
    if end.is_some_and(|end| end <= reader.size()) {
        Some(loaded)
    } else {
        warn!(
            "{}: {:?} index addresses bytes past the end of the file",
            reader.identifier(),
            loaded.framing
        );
        None
    }
}
