//! Template stage of the hybrid matcher.
//!
//! The expected-overlap percentage fixes two derived bands: the
//! template is a thin strip from the trailing edge of the source tile
//! (`edge_pct`), and the search area is a wider band at the leading
//! edge of the destination (`search_pct`). For vertical pairs the
//! search band spans the full tile width, which tolerates the sideways
//! drift a scroll capture picks up between rows. Normalized
//! cross-correlation over the band gives a peak location and value; a
//! strong peak converts directly into the `dst − src` offset.

use image::GrayImage;
use image::imageops::crop_imm;
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};

use super::Direction;

/// A correlation peak must clear this to count as a template match;
/// anything weaker falls through to the feature stage.
pub(crate) const TEMPLATE_PEAK_MIN: f32 = 0.8;

/// Match the overlap strip of `src` inside the search band of `dst`.
///
/// Returns `(offset, peak)`. `offset` is `None` when the peak is weak,
/// the bands degenerate, or the template strip is constant — a flat
/// patch correlates equally at every shift, so its peak carries no
/// position information.
pub fn match_template_pair(
    src: &GrayImage,
    dst: &GrayImage,
    direction: Direction,
    overlap: f32,
) -> (Option<(i32, i32)>, f32) {
    let (w, h) = src.dimensions();

    let edge_pct = (overlap * 0.4).min(0.4);
    let search_pct = (overlap * 1.2).min(0.9);

    let (template, search, template_start) = if direction.is_horizontal() {
        let tpl_x0 = (w as f32 * (1.0 - edge_pct)) as u32;
        let search_w = (w as f32 * search_pct) as u32;
        if tpl_x0 >= w || search_w == 0 {
            return (None, 0.0);
        }
        (
            crop_imm(src, tpl_x0, 0, w - tpl_x0, h).to_image(),
            crop_imm(dst, 0, 0, search_w, h).to_image(),
            tpl_x0,
        )
    } else {
        let tpl_y0 = (h as f32 * (1.0 - edge_pct)) as u32;
        let search_h = (h as f32 * search_pct) as u32;
        if tpl_y0 >= h || search_h == 0 {
            return (None, 0.0);
        }
        (
            crop_imm(src, 0, tpl_y0, w, h - tpl_y0).to_image(),
            crop_imm(dst, 0, 0, w, search_h).to_image(),
            tpl_y0,
        )
    };

    if search.width() < template.width() || search.height() < template.height() {
        return (None, 0.0);
    }
    if is_constant(&template) {
        return (None, 0.0);
    }

    let response = match_template(
        &search,
        &template,
        MatchTemplateMethod::CrossCorrelationNormalized,
    );
    let extremes = find_extremes(&response);
    let peak = extremes.max_value;
    if !peak.is_finite() {
        return (None, 0.0);
    }
    let (px, py) = extremes.max_value_location;

    if peak > TEMPLATE_PEAK_MIN {
        let offset = if direction.is_horizontal() {
            (template_start as i32 - px as i32, -(py as i32))
        } else {
            (-(px as i32), template_start as i32 - py as i32)
        };
        (Some(offset), peak)
    } else {
        (None, peak)
    }
}

fn is_constant(img: &GrayImage) -> bool {
    let mut pixels = img.pixels();
    let Some(first) = pixels.next() else {
        return true;
    };
    pixels.all(|p| p == first)
}
