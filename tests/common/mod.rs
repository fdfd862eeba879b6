//! Shared helpers for the integration tests: deterministic textures
//! and synthetic tile grids written into temp directories.

use std::path::Path;

use image::{Rgb, RgbImage};
use tile_stitcher::TileId;

/// Deterministic per-pixel noise. Every coordinate gets a distinct
/// color, so cross-correlation peaks exactly at the true alignment.
pub fn textured_base(w: u32, h: u32, seed: u64) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let mut v = seed
            .wrapping_add(x as u64)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(y as u64)
            .wrapping_mul(1442695040888963407);
        v ^= v >> 29;
        Rgb([
            (v % 251) as u8,
            ((v >> 8) % 251) as u8,
            ((v >> 16) % 251) as u8,
        ])
    })
}

/// Cut one tile out of the base image.
pub fn cut_tile(base: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
    image::imageops::crop_imm(base, x, y, w, h).to_image()
}

/// Write `R<r>_C<c>.png` tiles cut from `base` at the given canvas
/// positions.
pub fn write_grid(
    dir: &Path,
    base: &RgbImage,
    tiles: &[(TileId, u32, u32)],
    tile_w: u32,
    tile_h: u32,
) {
    for &(id, x, y) in tiles {
        let tile = cut_tile(base, x, y, tile_w, tile_h);
        tile.save(dir.join(format!("R{:02}_C{:02}.png", id.r, id.c)))
            .unwrap();
    }
}

/// The standard 2×2 scenario: 100×100 tiles, H step (80, 0),
/// V step (0, 60), no jitter. Canvas extent 180×160.
pub fn write_two_by_two(dir: &Path, base: &RgbImage) {
    let tiles = [
        (TileId::new(0, 0), 0, 0),
        (TileId::new(0, 1), 80, 0),
        (TileId::new(1, 0), 0, 60),
        (TileId::new(1, 1), 80, 60),
    ];
    write_grid(dir, base, &tiles, 100, 100);
}
