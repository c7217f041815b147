use log::debug;

use crate::geometry::Window;
use crate::{Result, TileError, TileErrorCode};

pub fn plan_tiles(height: u32, width: u32, tile_size: u32) -> Result<Vec<Window>> {
    if tile_size == 0 {
        return Err(TileError::new(
            TileErrorCode::ConfigurationError,
            "tile_size must be > 0.",
        ));
    }

    let capacity = block_count(height, tile_size) * block_count(width, tile_size);
    let mut windows = Vec::with_capacity(capacity);
    for row_off in (0..height).step_by(tile_size as usize) {
        for col_off in (0..width).step_by(tile_size as usize) {
            windows.push(Window::new(
                col_off,
                row_off,
                tile_size.min(width - col_off),
                tile_size.min(height - row_off),
            ));
        }
    }

    debug!(
        "Planned {} tiles of size {tile_size}x{tile_size} over {height}x{width}",
        windows.len()
    );
    Ok(windows)
}

fn block_count(extent: u32, tile_size: u32) -> usize {
    extent.div_ceil(tile_size) as usize
}
