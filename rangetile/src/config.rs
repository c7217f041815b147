use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_METADATA_FETCH_LEN, DEFAULT_TILE_SIZE,
    MAX_COMPRESSION_LEVEL, TAG_PREAMBLE_LENGTH,
};
use crate::container::Framing;
use crate::{Result, TileError, TileErrorCode};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    pub tile_size: u32,
    pub compression_level: u8,
    pub spatial_tiling: bool,
    pub framing: Framing,
    pub parallel: bool,
    pub max_embedded_metadata_len: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            spatial_tiling: true,
            framing: Framing::Embedded,
            parallel: true,
            max_embedded_metadata_len: DEFAULT_METADATA_FETCH_LEN,
        }
    }
}

impl EncodeOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json).map_err(|err| {
            TileError::new(
                TileErrorCode::ConfigurationError,
                format!("Invalid encode options: {err}"),
            )
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(TileError::new(
                TileErrorCode::ConfigurationError,
                "tile_size must be > 0.",
            ));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(TileError::new(
                TileErrorCode::ConfigurationError,
                format!(
                    "compression_level must be between 0 and {MAX_COMPRESSION_LEVEL}, got {}.",
                    self.compression_level
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    pub metadata_fetch_len: usize,
    pub allow_full_download: bool,
    pub http_timeout_secs: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            metadata_fetch_len: DEFAULT_METADATA_FETCH_LEN,
            allow_full_download: false,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl ReaderOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json).map_err(|err| {
            TileError::new(
                TileErrorCode::ConfigurationError,
                format!("Invalid reader options: {err}"),
            )
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        // The prefix must at least cover the tag block magic and length.
        if self.metadata_fetch_len < TAG_PREAMBLE_LENGTH {
            return Err(TileError::new(
                TileErrorCode::ConfigurationError,
                format!(
                    "metadata_fetch_len must be at least {TAG_PREAMBLE_LENGTH}, got {}.",
                    self.metadata_fetch_len
                ),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(TileError::new(
                TileErrorCode::ConfigurationError,
                "http_timeout_secs must be > 0.",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options =
            EncodeOptions::from_json(r#"{"tile_size": 256, "framing": "sidecar"}"#)
                .expect("parse options");
        assert_eq!(options.tile_size, 256);
        assert_eq!(options.framing, Framing::Sidecar);
        assert_eq!(options.compression_level, DEFAULT_COMPRESSION_LEVEL);
        assert!(options.spatial_tiling);

        let reader = ReaderOptions::from_json("{}").expect("parse reader options");
        assert_eq!(reader, ReaderOptions::default());
    }

    #[test]
    fn rejects_invalid_options_before_io() {
        for json in [
            r#"{"tile_size": 0}"#,
            r#"{"compression_level": 9}"#,
            r#"{"framing": "zip"}"#,
            r#"{"tile_size": -4}"#,
        ] {
            let err = EncodeOptions::from_json(json).expect_err(json);
            assert_eq!(err.code, TileErrorCode::ConfigurationError, "{json}");
        }
    }

    #[test]
    fn reader_prefix_must_cover_the_tag_preamble() {
        for json in [
            r#"{"metadata_fetch_len": 4}"#,
            r#"{"metadata_fetch_len": 0}"#,
            r#"{"http_timeout_secs": 0}"#,
        ] {
            let err = ReaderOptions::from_json(json).expect_err(json);
            assert_eq!(err.code, TileErrorCode::ConfigurationError, "{json}");
        }
        let options = ReaderOptions::from_json(r#"{"metadata_fetch_len": 8}"#)
            .expect("smallest usable prefix");
        assert_eq!(options.metadata_fetch_len, TAG_PREAMBLE_LENGTH);
    }
}
