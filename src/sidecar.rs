//! Optional sidecar outputs: a low-resolution preview and a scatter
//! plot of the pairwise offsets.
//!
//! Both are diagnostic aids, not products: the preview answers "did
//! the offsets land tiles roughly where they belong" without waiting
//! for the full-resolution render, and the heatmap makes a bad capture
//! (wild offset spread) obvious at a glance. Sidecar failures never
//! abort the run; the pipeline reports them as status notes.

use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use tracing::warn;

use crate::cache::TileCache;
use crate::config::StitchConfig;
use crate::error::{StitchError, StitchResult};
use crate::grid::TileIndex;
use crate::matcher::MatchSet;
use crate::scale;
use crate::solver::PositionMap;
use crate::status::StatusSink;

const HEATMAP_SIZE: u32 = 640;
const HEATMAP_MARGIN: f32 = 48.0;

/// Compose a downscaled copy of the mosaic in memory and write it as
/// PNG. Uses the same opaque last-wins policy as the final render.
pub fn write_preview(
    index: &TileIndex,
    positions: &PositionMap,
    cache: &mut TileCache,
    config: &StitchConfig,
    sink: &StatusSink,
    path: &Path,
) -> StitchResult<()> {
    sink.status("composing low-resolution preview...");
    let scale_factor = config.preview_scale as f64;
    let tile_w = ((index.base_width as f64 * scale_factor) as u32).max(1);
    let tile_h = ((index.base_height as f64 * scale_factor) as u32).max(1);

    let scaled: Vec<_> = positions
        .iter()
        .map(|(id, (x, y))| {
            (
                *id,
                (*x as f64 * scale_factor) as i64,
                (*y as f64 * scale_factor) as i64,
            )
        })
        .collect();
    let min_x = scaled.iter().map(|(_, x, _)| *x).min().expect("nonempty");
    let min_y = scaled.iter().map(|(_, _, y)| *y).min().expect("nonempty");
    let max_x = scaled.iter().map(|(_, x, _)| *x + tile_w as i64).max().expect("nonempty");
    let max_y = scaled.iter().map(|(_, _, y)| *y + tile_h as i64).max().expect("nonempty");
    let canvas_w = max_x - min_x;
    let canvas_h = max_y - min_y;
    let sane_w = (index.grid.cols.len() as i64) * tile_w as i64 * 2;
    let sane_h = (index.grid.rows.len() as i64) * tile_h as i64 * 2;
    if canvas_w <= 0 || canvas_h <= 0 || canvas_w > sane_w || canvas_h > sane_h {
        return Err(StitchError::geometry(format!(
            "preview canvas {}x{} is implausible",
            canvas_w, canvas_h
        )));
    }

    let mut canvas =
        RgbImage::from_pixel(canvas_w as u32, canvas_h as u32, Rgb([0xFF, 0xFF, 0xFF]));

    for (id, sx, sy) in &scaled {
        let Some(tile_path) = index.path_of(*id) else {
            continue;
        };
        let tile_path = tile_path.to_path_buf();
        let full = match cache.read_color(&tile_path) {
            Ok(img) => img,
            Err(e) => {
                warn!(tile = %id, "preview skipping unreadable tile: {e}");
                continue;
            }
        };
        let small = scale::downscale_rgb(cache.resizer(), &full, tile_w, tile_h)?;
        blit_clipped(&mut canvas, &small, *sx - min_x, *sy - min_y);
    }

    crate::imgio::write_png_rgb(path, &canvas)?;
    sink.status(format!("preview saved: {}", path.display()));
    Ok(())
}

fn blit_clipped(canvas: &mut RgbImage, tile: &RgbImage, x: i64, y: i64) {
    let (cw, ch) = canvas.dimensions();
    for (tx, ty, pixel) in tile.enumerate_pixels() {
        let px = x + tx as i64;
        let py = y + ty as i64;
        if px >= 0 && py >= 0 && (px as u32) < cw && (py as u32) < ch {
            canvas.put_pixel(px as u32, py as u32, *pixel);
        }
    }
}

/// Scatter the retained `(dx, dy)` offsets, colored by magnitude, onto
/// a plot canvas and write it as PNG. With no retained matches the
/// heatmap is skipped with a status note.
pub fn write_heatmap(matches: &MatchSet, sink: &StatusSink, path: &Path) -> StitchResult<()> {
    if matches.is_empty() {
        sink.status("no offset data; skipping heatmap.");
        return Ok(());
    }

    let offsets: Vec<(f32, f32)> = matches
        .iter()
        .map(|m| (m.offset.0 as f32, m.offset.1 as f32))
        .collect();

    let min_dx = offsets.iter().map(|o| o.0).fold(f32::INFINITY, f32::min);
    let max_dx = offsets.iter().map(|o| o.0).fold(f32::NEG_INFINITY, f32::max);
    let min_dy = offsets.iter().map(|o| o.1).fold(f32::INFINITY, f32::min);
    let max_dy = offsets.iter().map(|o| o.1).fold(f32::NEG_INFINITY, f32::max);
    let span_x = (max_dx - min_dx).max(1.0);
    let span_y = (max_dy - min_dy).max(1.0);
    let max_magnitude = offsets
        .iter()
        .map(|(dx, dy)| dx.hypot(*dy))
        .fold(0.0f32, f32::max)
        .max(f32::EPSILON);

    let size = HEATMAP_SIZE as f32;
    let plot = size - 2.0 * HEATMAP_MARGIN;
    let to_px = |dx: f32, dy: f32| {
        (
            HEATMAP_MARGIN + (dx - min_dx) / span_x * plot,
            HEATMAP_MARGIN + (dy - min_dy) / span_y * plot,
        )
    };

    let mut canvas = RgbImage::from_pixel(HEATMAP_SIZE, HEATMAP_SIZE, Rgb([0xFF, 0xFF, 0xFF]));

    // Light frame plus gridlines at quarter steps.
    let grid = Rgb([210, 210, 210]);
    for i in 0..=4 {
        let t = HEATMAP_MARGIN + plot * i as f32 / 4.0;
        draw_line_segment_mut(&mut canvas, (HEATMAP_MARGIN, t), (size - HEATMAP_MARGIN, t), grid);
        draw_line_segment_mut(&mut canvas, (t, HEATMAP_MARGIN), (t, size - HEATMAP_MARGIN), grid);
    }

    for (dx, dy) in &offsets {
        let (px, py) = to_px(*dx, *dy);
        let color = jet(dx.hypot(*dy) / max_magnitude);
        draw_filled_circle_mut(&mut canvas, (px as i32, py as i32), 4, color);
    }

    crate::imgio::write_png_rgb(path, &canvas)?;
    sink.status(format!("offset heatmap saved: {}", path.display()));
    Ok(())
}

/// Classic jet ramp: blue through green to red as `t` goes 0 → 1.
fn jet(t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileId;
    use crate::matcher::{Direction, PairMatch};

    #[test]
    fn test_preview_dimensions_track_scale() {
        let dir = tempfile::tempdir().unwrap();
        for (r, c) in [(0u32, 0u32), (0, 1)] {
            let name = format!("R{:02}_C{:02}.png", r, c);
            crate::imgio::write_png_rgb(
                &dir.path().join(name),
                &RgbImage::from_pixel(40, 40, Rgb([90, 90, 90])),
            )
            .unwrap();
        }
        let index = TileIndex::scan(dir.path()).unwrap();
        let mut positions = PositionMap::new();
        positions.insert(TileId::new(0, 0), (0, 0));
        positions.insert(TileId::new(0, 1), (32, 0));

        let mut cache = TileCache::new(8);
        let mut config = StitchConfig::default();
        config.preview_scale = 0.5;
        let out = dir.path().join("preview.png");
        write_preview(
            &index,
            &positions,
            &mut cache,
            &config,
            &StatusSink::disconnected(),
            &out,
        )
        .unwrap();

        let img = crate::imgio::read_image(&out).unwrap().to_rgb8();
        // Scaled extent: 32*0.5 + 40*0.5 = 36 wide, 20 tall.
        assert_eq!(img.dimensions(), (36, 20));
        assert_eq!(img.get_pixel(10, 10), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_heatmap_skips_without_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("heatmap.png");
        write_heatmap(&MatchSet::default(), &StatusSink::disconnected(), &out).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_heatmap_writes_plot() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("heatmap.png");
        let mut set = MatchSet::default();
        for (dx, dy) in [(80, 0), (81, -2), (0, 60)] {
            set.matches.push(PairMatch {
                src: TileId::new(0, 0),
                dst: TileId::new(0, 1),
                offset: (dx, dy),
                score: 0.9,
                direction: Direction::HForward,
                match_count: 0,
                template_val: 0.9,
            });
        }
        write_heatmap(&set, &StatusSink::disconnected(), &out).unwrap();
        let img = crate::imgio::read_image(&out).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (HEATMAP_SIZE, HEATMAP_SIZE));
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), Rgb([0, 0, 127]));
        assert_eq!(jet(1.0), Rgb([127, 0, 0]));
    }
}
