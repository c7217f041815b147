use std::fmt;

use log::debug;

use crate::geometry::BBox;
use crate::index::{Frame, SpatialIndex};

/// Inclusive `[start, end]` byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn shifted(&self, by: u64) -> ByteRange {
        ByteRange::new(self.start + by, self.end + by)
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Sorts and coalesces ranges that overlap or touch.
pub fn merge_ranges(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.sort_unstable();
    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

impl SpatialIndex {
    pub fn intersecting_frames(&self, bbox: &BBox) -> Vec<&Frame> {
        self.frames()
            .iter()
            .filter(|frame| bbox.intersects(&frame.bbox))
            .collect()
    }

    pub fn byte_ranges(&self, bbox: &BBox) -> Vec<ByteRange> {
        let ranges = self
            .intersecting_frames(bbox)
            .into_iter()
            .filter_map(|frame| {
                frame
                    .byte_end()
                    .map(|end| ByteRange::new(frame.byte_offset, end))
            })
            .collect();
        let merged = merge_ranges(ranges);
        debug!("Found {} byte ranges for bbox {bbox}", merged.len());
        merged
    }
}
