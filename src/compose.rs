//! Stage 5: compositing onto an on-disk canvas.
//!
//! The canvas for a large capture can exceed physical memory, so the
//! compositor backs it with two temporary files memory-mapped
//! read/write: a 3-channel color canvas initialized to white and a
//! 1-channel coverage mask recording which pixels were written.
//! Placement is opaque and last-wins in tile sort order; RGBA tiles
//! copy only where alpha is nonzero. After placement the mask's
//! nonzero bounding box is cropped out and encoded as the final PNG.
//! Both backing files are unlinked when the mapping is dropped, on
//! success and on error alike.

use std::path::Path;

use image::RgbImage;
use memmap2::MmapOptions;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::StitchConfig;
use crate::error::{StitchError, StitchResult};
use crate::grid::TileIndex;
use crate::imgio;
use crate::solver::PositionMap;
use crate::status::StatusSink;

/// Canvas size may exceed the grid extent by at most this factor
/// before the geometry is considered bogus.
const CANVAS_SANITY_FACTOR: f64 = 1.5;

/// Render the (window-filtered) tiles and write the final PNG.
/// Progress spans `50..100`. Returns the cropped output dimensions.
pub fn render(
    index: &TileIndex,
    positions: &PositionMap,
    config: &StitchConfig,
    sink: &StatusSink,
    output: &Path,
) -> StitchResult<(u32, u32)> {
    sink.status("preparing final render...");

    let render_set: Vec<_> = positions
        .iter()
        .filter(|(id, _)| {
            config
                .stitch_range
                .map(|range| range.contains(**id))
                .unwrap_or(true)
        })
        .map(|(id, pos)| (*id, *pos))
        .collect();
    if render_set.is_empty() {
        return Err(StitchError::config(
            "stitch_range",
            "selects no tiles to render",
        ));
    }

    let tile_w = index.base_width as i64;
    let tile_h = index.base_height as i64;
    let min_x = render_set.iter().map(|(_, (x, _))| *x).min().expect("nonempty");
    let min_y = render_set.iter().map(|(_, (_, y))| *y).min().expect("nonempty");
    let max_x = render_set
        .iter()
        .map(|(_, (x, _))| *x + tile_w)
        .max()
        .expect("nonempty");
    let max_y = render_set
        .iter()
        .map(|(_, (_, y))| *y + tile_h)
        .max()
        .expect("nonempty");
    let canvas_w = max_x - min_x;
    let canvas_h = max_y - min_y;

    // The guard must fire before any backing file is opened; a bogus
    // offset set must not allocate terabytes on disk.
    let sane_w = (index.grid.cols.len() as f64 * tile_w as f64 * CANVAS_SANITY_FACTOR) as i64;
    let sane_h = (index.grid.rows.len() as f64 * tile_h as f64 * CANVAS_SANITY_FACTOR) as i64;
    if canvas_w <= 0 || canvas_h <= 0 || canvas_w > sane_w || canvas_h > sane_h {
        return Err(StitchError::geometry(format!(
            "computed canvas size {}x{} is implausible (limit {}x{})",
            canvas_w, canvas_h, sane_w, sane_h
        )));
    }
    let canvas_w = canvas_w as usize;
    let canvas_h = canvas_h as usize;

    sink.status(format!(
        "allocating on-disk canvas {}x{}...",
        canvas_w, canvas_h
    ));

    let canvas_file = backing_file("stitcher_canvas_", (canvas_w * canvas_h * 3) as u64)?;
    let mask_file = backing_file("stitcher_mask_", (canvas_w * canvas_h) as u64)?;
    let mut canvas = unsafe { MmapOptions::new().map_mut(canvas_file.as_file()) }
        .map_err(|e| StitchError::io("mapping canvas backing file", e))?;
    let mut mask = unsafe { MmapOptions::new().map_mut(mask_file.as_file()) }
        .map_err(|e| StitchError::io("mapping mask backing file", e))?;
    canvas.fill(0xFF);
    // The mask is already zeroed: ftruncate extends with zero bytes.

    sink.status("rendering tiles...");
    let total = render_set.len();
    for (i, (id, (x, y))) in render_set.iter().enumerate() {
        if let Err(e) = place_tile(
            index,
            *id,
            (*x - min_x, *y - min_y),
            &mut canvas,
            &mut mask,
            canvas_w,
            canvas_h,
        ) {
            sink.status(format!("skipping tile {}: {}", id, e));
        }
        sink.progress((50 + (i + 1) * 50 / total) as u8);
    }

    canvas
        .flush()
        .map_err(|e| StitchError::io("flushing canvas", e))?;
    mask.flush()
        .map_err(|e| StitchError::io("flushing mask", e))?;

    sink.status("cropping to covered area...");
    let final_image = match coverage_bounds(&mask, canvas_w, canvas_h) {
        None => {
            sink.status("no covered pixels; emitting a 1x1 placeholder.");
            RgbImage::new(1, 1)
        }
        Some((x0, y0, x1, y1)) => {
            let out_w = x1 - x0 + 1;
            let out_h = y1 - y0 + 1;
            debug!(out_w, out_h, "cropping canvas");
            let mut buf = Vec::with_capacity(out_w * out_h * 3);
            for y in y0..=y1 {
                let start = (y * canvas_w + x0) * 3;
                buf.extend_from_slice(&canvas[start..start + out_w * 3]);
            }
            RgbImage::from_raw(out_w as u32, out_h as u32, buf)
                .expect("buffer sized for dimensions")
        }
    };

    sink.status("saving final image...");
    imgio::write_png_rgb(output, &final_image)?;
    // canvas_file / mask_file unlink their backing files on drop.
    Ok(final_image.dimensions())
}

fn backing_file(prefix: &str, len: u64) -> StitchResult<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".mmap")
        .tempfile()
        .map_err(|e| StitchError::io("creating backing file", e))?;
    file.as_file()
        .set_len(len)
        .map_err(|e| StitchError::io("sizing backing file", e))?;
    Ok(file)
}

/// Blit one tile at its canvas position, clipping to the canvas on all
/// sides. RGBA tiles copy only pixels with nonzero alpha.
fn place_tile(
    index: &TileIndex,
    id: crate::grid::TileId,
    canvas_pos: (i64, i64),
    canvas: &mut [u8],
    mask: &mut [u8],
    canvas_w: usize,
    canvas_h: usize,
) -> StitchResult<()> {
    let path = index
        .path_of(id)
        .ok_or_else(|| StitchError::input(format!("no file for tile {}", id)))?;
    let img = imgio::read_image(path)?;
    if (img.width(), img.height()) != (index.base_width, index.base_height) {
        return Err(StitchError::input(format!(
            "tile shape {}x{} deviates from base {}x{}",
            img.width(),
            img.height(),
            index.base_width,
            index.base_height
        )));
    }

    let tile_w = img.width() as i64;
    let tile_h = img.height() as i64;
    let (mut cx, mut cy) = canvas_pos;
    let mut src_x = 0i64;
    let mut src_y = 0i64;
    let mut copy_w = tile_w;
    let mut copy_h = tile_h;
    if cx < 0 {
        src_x = -cx;
        copy_w -= src_x;
        cx = 0;
    }
    if cy < 0 {
        src_y = -cy;
        copy_h -= src_y;
        cy = 0;
    }
    if cx + copy_w > canvas_w as i64 {
        copy_w = canvas_w as i64 - cx;
    }
    if cy + copy_h > canvas_h as i64 {
        copy_h = canvas_h as i64 - cy;
    }
    if copy_w <= 0 || copy_h <= 0 {
        return Ok(());
    }
    let (cx, cy) = (cx as usize, cy as usize);
    let (src_x, src_y) = (src_x as usize, src_y as usize);
    let (copy_w, copy_h) = (copy_w as usize, copy_h as usize);
    let tile_w = tile_w as usize;

    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let data = rgba.as_raw();
        for row in 0..copy_h {
            let src_base = ((src_y + row) * tile_w + src_x) * 4;
            let dst_base = ((cy + row) * canvas_w + cx) * 3;
            let mask_base = (cy + row) * canvas_w + cx;
            for col in 0..copy_w {
                let s = src_base + col * 4;
                if data[s + 3] > 0 {
                    let d = dst_base + col * 3;
                    canvas[d..d + 3].copy_from_slice(&data[s..s + 3]);
                    mask[mask_base + col] = 0xFF;
                }
            }
        }
    } else {
        let rgb = img.to_rgb8();
        let data = rgb.as_raw();
        for row in 0..copy_h {
            let src_base = ((src_y + row) * tile_w + src_x) * 3;
            let dst_base = ((cy + row) * canvas_w + cx) * 3;
            canvas[dst_base..dst_base + copy_w * 3]
                .copy_from_slice(&data[src_base..src_base + copy_w * 3]);
            let mask_base = (cy + row) * canvas_w + cx;
            mask[mask_base..mask_base + copy_w].fill(0xFF);
        }
    }
    Ok(())
}

/// Inclusive bounding box of nonzero mask pixels, or `None` when the
/// mask is empty.
fn coverage_bounds(
    mask: &[u8],
    canvas_w: usize,
    canvas_h: usize,
) -> Option<(usize, usize, usize, usize)> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for y in 0..canvas_h {
        let row = &mask[y * canvas_w..(y + 1) * canvas_w];
        let Some(first) = row.iter().position(|&m| m != 0) else {
            continue;
        };
        let last = row.iter().rposition(|&m| m != 0).expect("row has data");
        bounds = Some(match bounds {
            None => (first, y, last, y),
            Some((x0, y0, x1, _)) => (x0.min(first), y0, x1.max(last), y),
        });
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileId;
    use image::{Rgb, Rgba, RgbaImage};
    use std::path::PathBuf;

    fn solid_tile(w: u32, h: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(color))
    }

    fn write_rgba(path: &PathBuf, img: &RgbaImage) {
        img.save(path).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        index: TileIndex,
    }

    fn fixture(tiles: &[(TileId, RgbImage)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (id, img) in tiles {
            imgio::write_png_rgb(&dir.path().join(id.canonical_name()), img).unwrap();
        }
        let index = TileIndex::scan(dir.path()).unwrap();
        Fixture { _dir: dir, index }
    }

    #[test]
    fn test_two_tile_overlap_is_last_wins() {
        let f = fixture(&[
            (TileId::new(0, 0), solid_tile(10, 10, [200, 0, 0])),
            (TileId::new(0, 1), solid_tile(10, 10, [0, 200, 0])),
        ]);
        let mut positions = PositionMap::new();
        positions.insert(TileId::new(0, 0), (0, 0));
        positions.insert(TileId::new(0, 1), (6, 0));

        let out_dir = tempfile::tempdir().unwrap();
        let out = out_dir.path().join("mosaic.png");
        let dims = render(
            &f.index,
            &positions,
            &StitchConfig::default(),
            &StatusSink::disconnected(),
            &out,
        )
        .unwrap();
        assert_eq!(dims, (16, 10));

        let img = imgio::read_image(&out).unwrap().to_rgb8();
        // The overlap column belongs to the later tile.
        assert_eq!(img.get_pixel(5, 5), &Rgb([200, 0, 0]));
        assert_eq!(img.get_pixel(6, 5), &Rgb([0, 200, 0]));
        assert_eq!(img.get_pixel(15, 5), &Rgb([0, 200, 0]));
    }

    #[test]
    fn test_geometry_guard_fires_before_allocation() {
        let f = fixture(&[
            (TileId::new(0, 0), solid_tile(10, 10, [1, 2, 3])),
            (TileId::new(0, 1), solid_tile(10, 10, [1, 2, 3])),
        ]);
        let mut positions = PositionMap::new();
        positions.insert(TileId::new(0, 0), (0, 0));
        // 2 cols x 10 px x 1.5 = 30 px limit; 500 blows past it.
        positions.insert(TileId::new(0, 1), (500, 0));

        let out_dir = tempfile::tempdir().unwrap();
        let err = render(
            &f.index,
            &positions,
            &StitchConfig::default(),
            &StatusSink::disconnected(),
            &out_dir.path().join("mosaic.png"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "geometry");
    }

    #[test]
    fn test_transparent_border_is_cropped_out() {
        // A single RGBA tile whose outer 3 px are fully transparent.
        let dir = tempfile::tempdir().unwrap();
        let mut rgba = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 0]));
        for y in 3..17 {
            for x in 3..17 {
                rgba.put_pixel(x, y, Rgba([50, 60, 70, 255]));
            }
        }
        write_rgba(&dir.path().join("R00_C00.png"), &rgba);
        let index = TileIndex::scan(dir.path()).unwrap();

        let mut positions = PositionMap::new();
        positions.insert(TileId::new(0, 0), (0, 0));

        let out_dir = tempfile::tempdir().unwrap();
        let out = out_dir.path().join("mosaic.png");
        let dims = render(
            &index,
            &positions,
            &StitchConfig::default(),
            &StatusSink::disconnected(),
            &out,
        )
        .unwrap();
        assert_eq!(dims, (14, 14));
        let img = imgio::read_image(&out).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0), &Rgb([50, 60, 70]));
    }

    #[test]
    fn test_window_filters_render_set() {
        let f = fixture(&[
            (TileId::new(0, 0), solid_tile(10, 10, [10, 10, 10])),
            (TileId::new(0, 1), solid_tile(10, 10, [20, 20, 20])),
        ]);
        let mut positions = PositionMap::new();
        positions.insert(TileId::new(0, 0), (0, 0));
        positions.insert(TileId::new(0, 1), (8, 0));

        let mut config = StitchConfig::default();
        config.stitch_range = Some(crate::config::StitchRange {
            r_min: 0,
            r_max: 0,
            c_min: 1,
            c_max: 1,
        });

        let out_dir = tempfile::tempdir().unwrap();
        let out = out_dir.path().join("mosaic.png");
        let dims = render(
            &f.index,
            &positions,
            &config,
            &StatusSink::disconnected(),
            &out,
        )
        .unwrap();
        // Only the second tile renders.
        assert_eq!(dims, (10, 10));
        let img = imgio::read_image(&out).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0), &Rgb([20, 20, 20]));
    }
}
