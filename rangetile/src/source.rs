use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use crate::config::ReaderOptions;
use crate::query::ByteRange;
use crate::{Result, TileError, TileErrorCode};

pub trait RangeReader: Send + Sync {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    fn size(&self) -> u64;

    fn identifier(&self) -> &str;

    /// Fetches the file next to this one with its extension replaced by
    /// `extension`. `Ok(None)` when it does not exist.
    fn read_companion(&self, extension: &str) -> Result<Option<Vec<u8>>>;

    fn is_local(&self) -> bool {
        let id = self.identifier();
        !id.starts_with("http://") && !id.starts_with("https://")
    }
}

pub struct LocalRangeReader {
    path: PathBuf,
    id: String,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let id = path.display().to_string();
        let metadata = fs::metadata(&path).map_err(|err| {
            TileError::new(
                TileErrorCode::SourceUnavailable,
                format!("Cannot open container: {err}"),
            )
            .context(&id)
        })?;
        Ok(Self {
            path,
            id,
            size: metadata.len(),
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = ByteRange::new(offset, offset + length as u64 - 1);
        let read = || -> std::io::Result<Vec<u8>> {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buffer = vec![0_u8; length];
            file.read_exact(&mut buffer)?;
            Ok(buffer)
        };
        read().map_err(|err| {
            TileError::new(
                TileErrorCode::SourceUnavailable,
                format!("Read of bytes {range} failed: {err}"),
            )
            .context(&self.id)
        })
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.id
    }

    fn read_companion(&self, extension: &str) -> Result<Option<Vec<u8>>> {
        let companion = self.path.with_extension(extension);
        if !companion.is_file() {
            return Ok(None);
        }
        fs::read(&companion).map(Some).map_err(|err| {
            TileError::new(
                TileErrorCode::SourceUnavailable,
                format!("Cannot read companion file: {err}"),
            )
            .context(companion.display())
        })
    }
}

pub struct HttpRangeReader {
    url: String,
    size: u64,
    client: Client,
    allow_full_download: bool,
}

impl HttpRangeReader {
    pub fn new(url: &str, options: &ReaderOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.http_timeout_secs))
            .build()
            .map_err(|err| unavailable(url, format!("Cannot build HTTP client: {err}")))?;

        let response = client
            .head(url)
            .send()
            .map_err(|err| unavailable(url, format!("HEAD failed: {err}")))?;
        if !response.status().is_success() {
            return Err(unavailable(
                url,
                format!("HEAD returned {}", response.status()),
            ));
        }
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| unavailable(url, "HEAD response has no Content-Length"))?;
        debug!("Opened {url}: {size} bytes");

        Ok(Self {
            url: url.to_string(),
            size,
            client,
            allow_full_download: options.allow_full_download,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = ByteRange::new(offset, offset + length as u64 - 1);
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range.header_value())
            .send()
            .map_err(|err| unavailable(&self.url, format!("GET bytes {range} failed: {err}")))?;

        let status = response.status();
        let full_body = match status {
            StatusCode::PARTIAL_CONTENT => false,
            StatusCode::OK if self.allow_full_download => {
                warn!(
                    "{} ignored Range {range}, downloading the full body",
                    self.url
                );
                true
            }
            StatusCode::OK => {
                return Err(TileError::new(
                    TileErrorCode::RangeUnsupported,
                    format!("Server answered 200 instead of 206 for bytes {range}"),
                )
                .context(&self.url));
            }
            other => {
                return Err(unavailable(
                    &self.url,
                    format!("GET bytes {range} returned {other}"),
                ));
            }
        };

        let body = response
            .bytes()
            .map_err(|err| unavailable(&self.url, format!("Reading bytes {range} failed: {err}")))?;
        let bytes = if full_body {
            let start = offset as usize;
            body.get(start..start + length).map(<[u8]>::to_vec)
        } else {
            (body.len() == length).then(|| body.to_vec())
        };
        bytes.ok_or_else(|| {
            unavailable(
                &self.url,
                format!("Short response for bytes {range}: got {} bytes", body.len()),
            )
        })
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }

    fn read_companion(&self, extension: &str) -> Result<Option<Vec<u8>>> {
        let url = companion_url(&self.url, extension);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| unavailable(&url, format!("GET failed: {err}")))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .bytes()
                .map(|body| Some(body.to_vec()))
                .map_err(|err| unavailable(&url, format!("Reading body failed: {err}"))),
            status => Err(unavailable(&url, format!("GET returned {status}"))),
        }
    }
}

pub fn open_source(location: &str, options: &ReaderOptions) -> Result<Arc<dyn RangeReader>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpRangeReader::new(location, options)?))
    } else {
        Ok(Arc::new(LocalRangeReader::new(location)?))
    }
}

fn unavailable(location: &str, message: impl Into<String>) -> TileError {
    TileError::new(TileErrorCode::SourceUnavailable, message).context(location)
}

/// Swaps the extension of the last path segment, leaving any query intact.
fn companion_url(url: &str, extension: &str) -> String {
    let (base, query) = match url.find(['?', '#']) {
        Some(pos) => url.split_at(pos),
        None => (url, ""),
    };
    let segment_start = base.rfind('/').map_or(0, |pos| pos + 1);
    let stem_end = match base[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => segment_start + dot,
        _ => base.len(),
    };
    format!("{}.{extension}{query}", &base[..stem_end])
}
