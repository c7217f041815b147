use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use rangetile::{
    compare_blocks, encode_container, encode_raster, Affine, BBox, ContainerReader, DType,
    DeflateStreamCodec, EncodeOptions, Framing, MemoryRaster, RasterAttributes, ReaderOptions,
    TileErrorCode,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Minimal HTTP/1.1 file server. With `honor_range` off it answers every
/// GET with the full body, like a server without range support.
fn serve(files: HashMap<String, Vec<u8>>, honor_range: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    let files = Arc::new(files);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let files = Arc::clone(&files);
            thread::spawn(move || {
                let _ = respond(stream, &files, honor_range);
            });
        }
    });
    format!("http://{addr}")
}

fn respond(
    mut stream: TcpStream,
    files: &HashMap<String, Vec<u8>>,
    honor_range: bool,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    let Some(body) = files.get(path) else {
        return stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    };

    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            body.len()
        );
        return stream.write_all(head.as_bytes());
    }

    let span = range
        .filter(|_| honor_range)
        .and_then(|value| parse_range(&value, body.len()));
    match span {
        Some((start, end)) => {
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{}\r\nConnection: close\r\n\r\n",
                end - start + 1,
                body.len()
            );
            stream.write_all(head.as_bytes())?;
            stream.write_all(&body[start..=end])
        }
        None => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes())?;
            stream.write_all(body)
        }
    }
}

fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start <= end && end < len).then_some((start, end))
}

fn sample_raster() -> MemoryRaster {
    let attributes = RasterAttributes {
        width: 300,
        height: 200,
        count: 2,
        dtype: DType::Int16,
        crs: "EPSG:32633".to_string(),
        transform: Affine::new(30.0, 0.0, 500_000.0, 0.0, -30.0, 4_000_000.0),
    };
    let bands = (0..2_u32)
        .map(|band| {
            (0..200_u32)
                .flat_map(|row| {
                    (0..300_u32).map(move |col| f64::from(row + col) - f64::from(band) * 250.0)
                })
                .collect()
        })
        .collect();
    MemoryRaster::new(attributes, bands).expect("build raster")
}

fn hosted(framing: Framing, honor_range: bool) -> (String, MemoryRaster) {
    let raster = sample_raster();
    let options = EncodeOptions {
        tile_size: 128,
        framing,
        ..EncodeOptions::default()
    };
    let encoded = encode_raster(&raster, &DeflateStreamCodec, &options).expect("encode");
    let container = encode_container(&encoded, &options).expect("frame");
    let mut files = HashMap::new();
    files.insert("/data/dem.rtile".to_string(), container.bytes);
    if let Some(sidecar) = container.sidecar {
        files.insert("/data/dem.spatial.json".to_string(), sidecar);
    }
    let base = serve(files, honor_range);
    (format!("{base}/data/dem.rtile"), raster)
}

#[test]
fn reads_tiles_over_range_requests() {
    init_logger();
    let (url, raster) = hosted(Framing::Embedded, true);
    let reader = ContainerReader::open(&url, ReaderOptions::default()).expect("open url");
    assert!(!reader.source().is_local());
    assert_eq!(reader.framing().expect("framing"), Framing::Embedded);
    assert_eq!(reader.index().expect("index").frames().len(), 6);

    let query = BBox::new(500_000.0, 3_996_500.0, 503_000.0, 4_000_000.0);
    let tiles = reader.fetch_tiles(&query).expect("fetch tiles");
    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0].frame.frame_id, 0);
    assert_eq!(reader.fetch_bbox(&query).expect("fetch bbox"), tiles[0].bytes);

    let decoded = reader.read_raster(&DeflateStreamCodec).expect("read raster");
    let stats = compare_blocks(raster.block(), &decoded).stats.expect("stats");
    assert!(stats.max_difference <= 1.0, "{}", stats.max_difference);
}

#[test]
fn loads_sidecar_index_next_to_the_url() {
    init_logger();
    let (url, _) = hosted(Framing::Sidecar, true);
    let reader = ContainerReader::open(&url, ReaderOptions::default()).expect("open url");
    assert_eq!(reader.framing().expect("framing"), Framing::Sidecar);
    assert_eq!(reader.payload_start().expect("payload start"), 0);
}

#[test]
fn full_body_answer_is_range_unsupported() {
    init_logger();
    let (url, _) = hosted(Framing::LengthPrefixed, false);
    let reader = ContainerReader::open(&url, ReaderOptions::default()).expect("open url");
    let err = reader.index().expect_err("server ignores Range");
    assert_eq!(err.code, TileErrorCode::RangeUnsupported);
    assert!(err.message.contains(&url), "{}", err.message);
}

#[test]
fn full_download_opt_in_slices_the_body() {
    init_logger();
    let (url, raster) = hosted(Framing::LengthPrefixed, false);
    let options = ReaderOptions {
        allow_full_download: true,
        ..ReaderOptions::default()
    };
    let reader = ContainerReader::open(&url, options).expect("open url");
    assert_eq!(reader.framing().expect("framing"), Framing::LengthPrefixed);
    let decoded = reader.read_raster(&DeflateStreamCodec).expect("read raster");
    assert!(compare_blocks(raster.block(), &decoded).shape_match);
}

#[test]
fn missing_url_is_source_unavailable() {
    init_logger();
    let base = serve(HashMap::new(), true);
    let url = format!("{base}/absent.rtile");
    let err = ContainerReader::open(&url, ReaderOptions::default())
        .err()
        .expect("404 on HEAD");
    assert_eq!(err.code, TileErrorCode::SourceUnavailable);
    assert!(err.message.contains("absent.rtile"));
}
