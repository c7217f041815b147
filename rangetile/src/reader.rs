use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;

use crate::codec::SampleCompressor;
use crate::config::ReaderOptions;
use crate::consts::TAG_PREAMBLE_LENGTH;
use crate::container::{load_index, Framing, LoadedIndex};
use crate::geometry::BBox;
use crate::index::{Frame, RasterInfo, SpatialIndex};
use crate::query::ByteRange;
use crate::raster::RasterBlock;
use crate::source::{open_source, RangeReader};
use crate::tags::ContainerSummary;
use crate::tiling::decode_tile;
use crate::{Result, TileError, TileErrorCode};

#[derive(Debug, Clone, PartialEq)]
pub struct TilePayload {
    pub frame: Frame,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub frame: Frame,
    pub block: RasterBlock,
}

pub struct ContainerReader {
    source: Arc<dyn RangeReader>,
    options: ReaderOptions,
    loaded: OnceCell<LoadedIndex>,
}

impl ContainerReader {
    pub fn open(location: &str, options: ReaderOptions) -> Result<Self> {
        options.validate()?;
        let source = open_source(location, &options)?;
        Ok(Self::from_source(source, options))
    }

    pub fn from_source(source: Arc<dyn RangeReader>, options: ReaderOptions) -> Self {
        Self {
            source,
            options,
            loaded: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &dyn RangeReader {
        self.source.as_ref()
    }

    fn loaded(&self) -> Result<&LoadedIndex> {
        self.loaded
            .get_or_try_init(|| {
                let prefix_len = self.options.metadata_fetch_len.max(TAG_PREAMBLE_LENGTH);
                load_index(self.source.as_ref(), prefix_len)
            })
    }

    pub fn index(&self) -> Result<&SpatialIndex> {
        self.loaded().map(|loaded| &loaded.index)
    }

    pub fn framing(&self) -> Result<Framing> {
        self.loaded().map(|loaded| loaded.framing)
    }

    pub fn payload_start(&self) -> Result<u64> {
        self.loaded().map(|loaded| loaded.payload_start)
    }

    pub fn summary(&self) -> Result<ContainerSummary> {
        let loaded = self.loaded()?;
        match &loaded.tags {
            Some(tags) => ContainerSummary::from_tags(tags),
            None => {
                let index = &loaded.index;
                let tiled = index.tile_size() < index.width().max(index.height());
                ContainerSummary::from_index(index, tiled)
            }
        }
    }

    pub fn byte_ranges(&self, bbox: &BBox) -> Result<Vec<ByteRange>> {
        Ok(self.index()?.byte_ranges(bbox))
    }

    /// Merged ranges as absolute file offsets, ready for `Range` requests.
    pub fn file_ranges(&self, bbox: &BBox) -> Result<Vec<ByteRange>> {
        let payload_start = self.payload_start()?;
        Ok(self
            .byte_ranges(bbox)?
            .into_iter()
            .map(|range| range.shifted(payload_start))
            .collect())
    }

    pub fn fetch_bbox(&self, bbox: &BBox) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (_, bytes) in self.fetch_ranges(bbox)? {
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    pub fn fetch_tiles(&self, bbox: &BBox) -> Result<Vec<TilePayload>> {
        let payload_start = self.payload_start()?;
        let chunks = self.fetch_ranges(bbox)?;
        self.index()?
            .intersecting_frames(bbox)
            .into_iter()
            .map(|frame| -> Result<TilePayload> {
                let Some(end) = frame.byte_end() else {
                    return Ok(TilePayload {
                        frame: frame.clone(),
                        bytes: Vec::new(),
                    });
                };
                let wanted = ByteRange::new(frame.byte_offset, end).shifted(payload_start);
                let (range, bytes) = chunks
                    .iter()
                    .find(|(range, _)| range.contains(&wanted))
                    .ok_or_else(|| {
                        TileError::new(
                            TileErrorCode::InvalidIndex,
                            format!("No fetched range covers bytes {wanted}."),
                        )
                        .context(format!("tile {}", frame.frame_id))
                    })?;
                let start = (wanted.start - range.start) as usize;
                Ok(TilePayload {
                    frame: frame.clone(),
                    bytes: bytes[start..start + wanted.len() as usize].to_vec(),
                })
            })
            .collect()
    }

    pub fn read_bbox(
        &self,
        bbox: &BBox,
        compressor: &dyn SampleCompressor,
    ) -> Result<Vec<DecodedTile>> {
        let raster = *self.raster_info()?;
        self.fetch_tiles(bbox)?
            .into_iter()
            .map(|tile| -> Result<DecodedTile> {
                let block = decode_tile(&tile.bytes, &tile.frame, &raster, compressor)?;
                Ok(DecodedTile {
                    frame: tile.frame,
                    block,
                })
            })
            .collect()
    }

    pub fn read_raster(&self, compressor: &dyn SampleCompressor) -> Result<RasterBlock> {
        let index = self.index()?;
        let raster = *self.raster_info()?;
        let payload_start = self.payload_start()?;
        let payload = self
            .source
            .read_range(payload_start, index.total_bytes() as usize)?;

        let cells = index.width() as usize * index.height() as usize;
        let bands = vec![vec![f64::NAN; cells]; usize::from(raster.count)];
        let mut full = RasterBlock::new(index.width(), index.height(), bands)?;
        for frame in index.frames() {
            let start = frame.byte_offset as usize;
            let bytes = &payload[start..start + frame.byte_size as usize];
            let block = decode_tile(bytes, frame, &raster, compressor)?;
            full.paste(&frame.window, &block)
                .map_err(|err| err.context(format!("tile {}", frame.frame_id)))?;
        }
        Ok(full)
    }

    fn raster_info(&self) -> Result<&RasterInfo> {
        self.index()?.raster().ok_or_else(|| {
            TileError::new(
                TileErrorCode::MissingRequiredField,
                "Index carries no raster info; tiles cannot be decoded.",
            )
            .context(self.source.identifier())
        })
    }

    fn fetch_ranges(&self, bbox: &BBox) -> Result<Vec<(ByteRange, Vec<u8>)>> {
        let ranges = self.file_ranges(bbox)?;
        debug!(
            "Fetching {} ranges from {} for bbox {bbox}",
            ranges.len(),
            self.source.identifier()
        );
        ranges
            .into_iter()
            .map(|range| -> Result<(ByteRange, Vec<u8>)> {
                let bytes = self.source.read_range(range.start, range.len() as usize)?;
                Ok((range, bytes))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeflateStreamCodec;
    use crate::config::EncodeOptions;
    use crate::container::encode_container;
    use crate::container::tests::MemoryReader;
    use crate::raster::RasterSource;
    use crate::tiling::encode_raster;
    use crate::tiling::tests::{sample_raster, small_options};

    fn reader_for(framing: Framing) -> (ContainerReader, crate::raster::MemoryRaster) {
        let raster = sample_raster(10, 9, 2);
        let options = EncodeOptions {
            framing,
            ..small_options(4)
        };
        let encoded = encode_raster(&raster, &DeflateStreamCodec, &options).expect("encode");
        let container = encode_container(&encoded, &options).expect("frame");
        let source = Arc::new(MemoryReader::from_container(&container));
        (
            ContainerReader::from_source(source, ReaderOptions::default()),
            raster,
        )
    }

    #[test]
    fn index_is_loaded_once_per_handle() {
        let (reader, _) = reader_for(Framing::Embedded);
        let first = reader.index().expect("index");
        let second = reader.index().expect("index");
        assert!(std::ptr::eq(first, second));
        assert_eq!(reader.framing().expect("framing"), Framing::Embedded);
    }

    #[test]
    fn file_ranges_are_offset_by_the_payload_start() {
        for framing in [Framing::Embedded, Framing::LengthPrefixed, Framing::Sidecar] {
            let (reader, _) = reader_for(framing);
            let extent = reader.index().expect("index").extent().expect("extent");
            let payload_start = reader.payload_start().expect("payload start");
            let relative = reader.byte_ranges(&extent).expect("ranges");
            let absolute = reader.file_ranges(&extent).expect("ranges");
            assert_eq!(relative.len(), 1);
            assert_eq!(absolute, vec![relative[0].shifted(payload_start)]);
            assert_eq!(absolute[0].end + 1, reader.source().size());
        }
    }

    #[test]
    fn fetched_tiles_match_their_frames() {
        let (reader, raster) = reader_for(Framing::LengthPrefixed);
        let query = BBox::new(10.0, 18.0, 13.0, 20.0);
        let tiles = reader.fetch_tiles(&query).expect("fetch tiles");
        assert_eq!(
            tiles.iter().map(|t| t.frame.frame_id).collect::<Vec<_>>(),
            vec![0, 1]
        );
        let joined: Vec<u8> = tiles.iter().flat_map(|t| t.bytes.clone()).collect();
        assert_eq!(reader.fetch_bbox(&query).expect("fetch bbox"), joined);

        let bound = reader
            .index()
            .expect("index")
            .raster()
            .expect("raster info")
            .quantization
            .error_bound();
        for tile in reader.read_bbox(&query, &DeflateStreamCodec).expect("decode") {
            let expected = raster.read_window(&tile.frame.window).expect("window");
            for (got, want) in tile.block.bands.iter().flatten().zip(expected.bands.iter().flatten())
            {
                assert!((got - want).abs() <= bound + 1e-9);
            }
        }
    }

    #[test]
    fn read_raster_reassembles_the_grid() {
        let (reader, raster) = reader_for(Framing::Sidecar);
        let decoded = reader.read_raster(&DeflateStreamCodec).expect("read raster");
        assert_eq!((decoded.width, decoded.height), (10, 9));
        assert!(decoded.bands.iter().flatten().all(|v| !v.is_nan()));
        let diff = crate::compare::compare_blocks(raster.block(), &decoded);
        assert!(diff.shape_match);
        assert!(diff.stats.expect("stats").max_difference < 1e-3);
    }

    #[test]
    fn sidecar_fallback_reads_payload_behind_a_broken_tag_block() {
        let raster = sample_raster(10, 9, 2);
        let options = EncodeOptions {
            framing: Framing::Embedded,
            ..small_options(4)
        };
        let encoded = encode_raster(&raster, &DeflateStreamCodec, &options).expect("encode");
        let container = encode_container(&encoded, &options).expect("frame");
        let mut tags = crate::tags::TagBlock::decode(&container.bytes)
            .expect("decode tags")
            .0;
        tags.set(crate::consts::KEY_SPATIAL_INDEX, "not base64!");
        let mut bytes = tags.encode().expect("encode tags");
        bytes.extend_from_slice(&encoded.payload);

        let mut source = MemoryReader::from_container(&container);
        source.bytes = bytes;
        source.companions.insert(
            crate::consts::SIDECAR_EXTENSION.to_string(),
            encoded.index.to_json().expect("json"),
        );
        let reader = ContainerReader::from_source(Arc::new(source), ReaderOptions::default());
        assert_eq!(reader.framing().expect("framing"), Framing::Sidecar);

        let frame0 = reader.index().expect("index").frame(0).expect("frame 0").clone();
        let fetched = reader.fetch_bbox(&frame0.bbox).expect("fetch bbox");
        assert_eq!(&fetched[..4], b"RTS1");
        let tiles = reader.fetch_tiles(&frame0.bbox).expect("fetch tiles");
        for tile in &tiles {
            let start = tile.frame.byte_offset as usize;
            assert_eq!(
                tile.bytes,
                encoded.payload[start..start + tile.frame.byte_size as usize]
            );
        }
        let decoded = reader.read_bbox(&frame0.bbox, &DeflateStreamCodec).expect("decode");
        assert_eq!(decoded.len(), tiles.len());
    }

    #[test]
    fn tiny_prefix_still_finds_the_embedded_index() {
        let (reader, _) = reader_for(Framing::Embedded);
        let options = ReaderOptions {
            metadata_fetch_len: 2,
            ..ReaderOptions::default()
        };
        let source = Arc::clone(&reader.source);
        let tiny = ContainerReader::from_source(source, options.clone());
        assert_eq!(tiny.framing().expect("framing"), Framing::Embedded);

        let err = ContainerReader::open("/nonexistent/dem.rtile", options)
            .err()
            .expect("prefix below the tag preamble");
        assert_eq!(err.code, TileErrorCode::ConfigurationError);
    }

    #[test]
    fn summary_is_derived_without_tags() {
        let (reader, _) = reader_for(Framing::LengthPrefixed);
        let summary = reader.summary().expect("summary");
        assert_eq!(summary.count, 2);
        assert_eq!(summary.num_tiles, 9);
        assert!(summary.spatial_tiling);
    }
}
