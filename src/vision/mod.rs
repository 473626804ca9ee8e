//! Image tiling and normalization.
//!
//! [`TileTransform`] fits a raw image onto the best canvas from the
//! tile-count-derived resolution set, splits the canvas into fixed-size
//! tiles, and normalizes each tile into a `[n_tiles, 3, tile, tile]`
//! tensor. Resampling is bilinear and the image is never upscaled to fill
//! the canvas; the unused canvas region is zero padding anchored at the
//! top-left.

mod error;
mod resolution;

pub use error::{ImageTransformError, Result};
pub use resolution::TileGrid;

pub(crate) use resolution::{select_best_grid, supported_grids};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use tracing::debug;

/// Per-channel normalization mean used when none is configured.
pub const DEFAULT_IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];

/// Per-channel normalization std used when none is configured.
pub const DEFAULT_IMAGE_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// One tiled image: tile tensor plus the chosen grid.
#[derive(Debug, Clone)]
pub struct TiledImage {
    /// Normalized tiles, `[n_tiles, 3, tile_size, tile_size]`
    pub tiles: Array4<f32>,
    /// Grid shape the tiles were cut from
    pub aspect_ratio: TileGrid,
}

/// Fixed-grid image tiling transform.
#[derive(Debug, Clone)]
pub struct TileTransform {
    tile_size: u32,
    grids: Vec<TileGrid>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl TileTransform {
    /// Create a transform for the given tile size and maximum tile count,
    /// with optional per-channel normalization statistics.
    ///
    /// # Errors
    /// Returns an error on zero tile size or tile count.
    pub fn new(
        tile_size: u32,
        max_num_tiles: usize,
        mean: Option<[f32; 3]>,
        std: Option<[f32; 3]>,
    ) -> Result<Self> {
        if tile_size == 0 {
            return Err(ImageTransformError::ZeroTileSize);
        }
        if max_num_tiles == 0 {
            return Err(ImageTransformError::ZeroTileCount);
        }
        Ok(Self {
            tile_size,
            grids: supported_grids(max_num_tiles),
            mean: mean.unwrap_or(DEFAULT_IMAGE_MEAN),
            std: std.unwrap_or(DEFAULT_IMAGE_STD),
        })
    }

    /// Configured tile edge length in pixels.
    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Tile an image into normalized tensors.
    ///
    /// The `inference` flag disables stochastic preprocessing; the
    /// fixed-grid pipeline applies none, so both modes are deterministic.
    ///
    /// # Errors
    /// Returns [`ImageTransformError::EmptyImage`] on zero-dimension
    /// input.
    pub fn apply(&self, image: &DynamicImage, inference: bool) -> Result<TiledImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageTransformError::EmptyImage { width, height });
        }

        let grid = select_best_grid(width, height, &self.grids, self.tile_size);
        debug!(
            width,
            height,
            rows = grid.rows,
            cols = grid.cols,
            inference,
            "fitting image to tile canvas"
        );

        let canvas_width = grid.cols as u32 * self.tile_size;
        let canvas_height = grid.rows as u32 * self.tile_size;
        let scale = (canvas_width as f32 / width as f32)
            .min(canvas_height as f32 / height as f32)
            .min(1.0);
        let new_width = ((width as f32 * scale) as u32).clamp(1, canvas_width);
        let new_height = ((height as f32 * scale) as u32).clamp(1, canvas_height);

        let resized = image.resize_exact(new_width, new_height, FilterType::Triangle);
        let mut canvas = DynamicImage::new_rgb8(canvas_width, canvas_height);
        image::imageops::overlay(&mut canvas, &resized, 0, 0);

        Ok(TiledImage {
            tiles: self.split_and_normalize(&canvas, grid),
            aspect_ratio: grid,
        })
    }

    /// Cut the canvas into row-major tiles, normalized channels-first.
    fn split_and_normalize(&self, canvas: &DynamicImage, grid: TileGrid) -> Array4<f32> {
        let tile = self.tile_size;
        let mut data = Vec::with_capacity(grid.n_tiles() * 3 * (tile * tile) as usize);
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let patch = canvas
                    .crop_imm(col as u32 * tile, row as u32 * tile, tile, tile)
                    .to_rgb8();
                for channel in 0..3 {
                    for pixel in patch.pixels() {
                        let value = f32::from(pixel.0[channel]) / 255.0;
                        data.push((value - self.mean[channel]) / self.std[channel]);
                    }
                }
            }
        }
        Array4::from_shape_vec(
            (grid.n_tiles(), 3, tile as usize, tile as usize),
            data,
        )
        .expect("tile buffer matches grid shape")
    }
}
