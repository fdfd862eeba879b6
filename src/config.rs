//! Engine configuration.
//!
//! [`StitchConfig`] is the explicit record that replaces ad-hoc option
//! lookups: every knob the engine recognizes, with its default, lives
//! here. Configurations deserialize from JSON (the capture front-end
//! persists its settings that way) and are validated once before the
//! pipeline starts; a bad value is a [`StitchError::Config`], never a
//! mid-run surprise.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{StitchError, StitchResult};
use crate::grid::TileId;

/// Inclusive row/column window restricting matching jobs and the render
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StitchRange {
    pub r_min: u32,
    pub r_max: u32,
    pub c_min: u32,
    pub c_max: u32,
}

impl StitchRange {
    pub fn contains(&self, id: TileId) -> bool {
        (self.r_min..=self.r_max).contains(&id.r) && (self.c_min..=self.c_max).contains(&id.c)
    }

    pub fn is_single_tile(&self) -> bool {
        self.r_min == self.r_max && self.c_min == self.c_max
    }
}

/// All recognized engine options.
///
/// | Option | Default | Effect |
/// |---|---|---|
/// | `min_score_threshold` | 0.75 | Drop pairs with effective score ≤ this |
/// | `stitch_range` | none | Restrict matching jobs and render set |
/// | `preview_scale` | 0.25 | Downscale factor for the preview sidecar |
/// | `cache_max_items` | 128 | LRU bound for both tile caches |
/// | `overlap_h_pct` | 60 | Expected horizontal overlap (percent) |
/// | `overlap_v_pct` | 40 | Expected vertical overlap (percent) |
/// | `initial_pos_weight` | 0.01 | Grid-anchor regularization strength |
/// | `nfeatures` | 2000 | Feature detector budget per tile |
/// | `lsqr_iter` | 200 | Solver iteration cap |
/// | `generate_preview` | false | Emit the preview sidecar |
/// | `generate_heatmap` | false | Emit the offset heatmap sidecar |
/// | `preview_path`, `heatmap_path` | derived | Sidecar destinations |
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub min_score_threshold: f32,
    pub stitch_range: Option<StitchRange>,
    pub preview_scale: f32,
    pub cache_max_items: usize,
    pub overlap_h_pct: u32,
    pub overlap_v_pct: u32,
    pub initial_pos_weight: f64,
    pub nfeatures: usize,
    pub lsqr_iter: usize,
    pub generate_preview: bool,
    pub generate_heatmap: bool,
    pub preview_path: Option<PathBuf>,
    pub heatmap_path: Option<PathBuf>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: 0.75,
            stitch_range: None,
            preview_scale: 0.25,
            cache_max_items: 128,
            overlap_h_pct: 60,
            overlap_v_pct: 40,
            initial_pos_weight: 0.01,
            nfeatures: 2000,
            lsqr_iter: 200,
            generate_preview: false,
            generate_heatmap: false,
            preview_path: None,
            heatmap_path: None,
        }
    }
}

impl StitchConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> StitchResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| StitchError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StitchError::config("config file", e.to_string()))
    }

    /// Range-check every option.
    pub fn validate(&self) -> StitchResult<()> {
        if !(1..=100).contains(&self.overlap_h_pct) {
            return Err(StitchError::config(
                "overlap_h_pct",
                "must be between 1 and 100",
            ));
        }
        if !(1..=100).contains(&self.overlap_v_pct) {
            return Err(StitchError::config(
                "overlap_v_pct",
                "must be between 1 and 100",
            ));
        }
        if !self.min_score_threshold.is_finite() || self.min_score_threshold < 0.0 {
            return Err(StitchError::config(
                "min_score_threshold",
                "must be a nonnegative number",
            ));
        }
        if !(self.preview_scale > 0.0 && self.preview_scale <= 1.0) {
            return Err(StitchError::config(
                "preview_scale",
                "must be in (0, 1]",
            ));
        }
        if self.cache_max_items == 0 {
            return Err(StitchError::config(
                "cache_max_items",
                "must be greater than 0",
            ));
        }
        if self.nfeatures == 0 {
            return Err(StitchError::config("nfeatures", "must be greater than 0"));
        }
        if self.lsqr_iter == 0 {
            return Err(StitchError::config("lsqr_iter", "must be greater than 0"));
        }
        if !(self.initial_pos_weight.is_finite() && self.initial_pos_weight >= 0.0) {
            return Err(StitchError::config(
                "initial_pos_weight",
                "must be a nonnegative number",
            ));
        }
        if let Some(range) = &self.stitch_range {
            if range.r_min > range.r_max || range.c_min > range.c_max {
                return Err(StitchError::config(
                    "stitch_range",
                    "min must not exceed max",
                ));
            }
        }
        Ok(())
    }

    /// Expected horizontal overlap as a fraction of tile width.
    pub fn overlap_h(&self) -> f32 {
        self.overlap_h_pct as f32 / 100.0
    }

    /// Expected vertical overlap as a fraction of tile height.
    pub fn overlap_v(&self) -> f32 {
        self.overlap_v_pct as f32 / 100.0
    }

    /// Preview destination: explicit path, or `<output>_preview.png`.
    pub fn preview_destination(&self, output: &Path) -> PathBuf {
        self.preview_path
            .clone()
            .unwrap_or_else(|| sibling_with_suffix(output, "_preview"))
    }

    /// Heatmap destination: explicit path, or `<output>_heatmap.png`.
    pub fn heatmap_destination(&self, output: &Path) -> PathBuf {
        self.heatmap_path
            .clone()
            .unwrap_or_else(|| sibling_with_suffix(output, "_heatmap"))
    }
}

fn sibling_with_suffix(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}{suffix}.png"))
}
