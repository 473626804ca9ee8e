//! Tile-grid resolution selection.
//!
//! An image is fitted to one canvas from a resolution set derived from the
//! maximum tile count: every `rows x cols` factor pair with
//! `rows * cols <= max_num_tiles`, scaled by the tile size. The best
//! canvas maximizes the resolution the downscaled image actually uses and
//! breaks ties by minimal wasted canvas area.

use serde::{Deserialize, Serialize};

/// Chosen tile-grid shape for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    /// Tile rows in the canvas
    pub rows: usize,
    /// Tile columns in the canvas
    pub cols: usize,
}

impl TileGrid {
    /// Total tile count of this grid.
    #[must_use]
    pub fn n_tiles(&self) -> usize {
        self.rows * self.cols
    }
}

/// All factor-pair grids with at most `max_num_tiles` tiles.
pub(crate) fn supported_grids(max_num_tiles: usize) -> Vec<TileGrid> {
    let mut grids = Vec::new();
    for n_tiles in 1..=max_num_tiles {
        for rows in 1..=n_tiles {
            if n_tiles % rows == 0 {
                grids.push(TileGrid {
                    rows,
                    cols: n_tiles / rows,
                });
            }
        }
    }
    grids
}

/// Pick the grid whose canvas best fits an image of the given size.
///
/// Effective resolution is what the aspect-preserving fit of the image
/// occupies on the canvas; the fit never upscales, so a sub-tile image
/// keeps its own resolution on every candidate canvas. The winner
/// maximizes effective resolution, then minimizes wasted canvas area.
pub(crate) fn select_best_grid(width: u32, height: u32, grids: &[TileGrid], tile_size: u32) -> TileGrid {
    let original_width = width as f32;
    let original_height = height as f32;
    let mut best_fit = grids[0];
    let mut max_effective_resolution = 0_u64;
    let mut min_wasted_resolution = u64::MAX;

    for &grid in grids {
        let canvas_width = grid.cols as u32 * tile_size;
        let canvas_height = grid.rows as u32 * tile_size;
        let scale = (canvas_width as f32 / original_width)
            .min(canvas_height as f32 / original_height)
            .min(1.0);
        let downscaled_width = (original_width * scale) as u64;
        let downscaled_height = (original_height * scale) as u64;

        let canvas_resolution = u64::from(canvas_width) * u64::from(canvas_height);
        let effective_resolution = canvas_resolution.min(downscaled_width * downscaled_height);
        let wasted_resolution = canvas_resolution - effective_resolution;

        if effective_resolution > max_effective_resolution
            || (effective_resolution == max_effective_resolution
                && wasted_resolution < min_wasted_resolution)
        {
            best_fit = grid;
            max_effective_resolution = effective_resolution;
            min_wasted_resolution = wasted_resolution;
        }
    }
    best_fit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_grids_max_four() {
        let grids = supported_grids(4);
        // 1x1; 1x2, 2x1; 1x3, 3x1; 1x4, 2x2, 4x1
        assert_eq!(grids.len(), 8);
        assert!(grids.contains(&TileGrid { rows: 2, cols: 2 }));
        assert!(grids.contains(&TileGrid { rows: 1, cols: 4 }));
        assert!(grids.iter().all(|g| g.n_tiles() <= 4));
    }

    #[test]
    fn test_supported_grids_max_one() {
        assert_eq!(supported_grids(1), vec![TileGrid { rows: 1, cols: 1 }]);
    }

    #[test]
    fn test_wide_image_selects_wide_grid() {
        let grids = supported_grids(4);
        let grid = select_best_grid(448, 224, &grids, 224);
        assert_eq!(grid, TileGrid { rows: 1, cols: 2 });
    }

    #[test]
    fn test_tall_image_selects_tall_grid() {
        let grids = supported_grids(4);
        let grid = select_best_grid(224, 448, &grids, 224);
        assert_eq!(grid, TileGrid { rows: 2, cols: 1 });
    }

    #[test]
    fn test_square_image_selects_square_grid() {
        let grids = supported_grids(4);
        let grid = select_best_grid(448, 448, &grids, 224);
        assert_eq!(grid, TileGrid { rows: 2, cols: 2 });
    }

    #[test]
    fn test_small_image_minimizes_waste() {
        let grids = supported_grids(4);
        // fits a single tile; every larger canvas only adds waste
        let grid = select_best_grid(100, 100, &grids, 224);
        assert_eq!(grid, TileGrid { rows: 1, cols: 1 });
    }
}
