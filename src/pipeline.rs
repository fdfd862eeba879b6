//! The engine driver.
//!
//! [`Stitcher`] owns the configuration, the status sink, and the tile
//! caches, and composes the five stages as plain functions threading
//! typed results: a verified [`TileIndex`] feeds the matcher, the
//! resulting [`MatchSet`](crate::matcher::MatchSet) feeds the
//! estimator, its [`PositionMap`](crate::solver::PositionMap) feeds the
//! refiner, and the refined positions feed the compositor. The types
//! make it impossible to run a stage before its input exists.
//!
//! A render set of exactly one tile — a 1×1 grid, or a stitch window
//! selecting a single tile — bypasses matching and solving entirely
//! and renders that tile at the origin. Any terminal error is emitted
//! as one `Error` status event; temp state cleans itself up on the way
//! out.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::cache::TileCache;
use crate::compose;
use crate::config::StitchConfig;
use crate::error::{StitchError, StitchResult};
use crate::grid::{TileId, TileIndex};
use crate::matcher::{self, MatchSet};
use crate::sidecar;
use crate::solver::{self, PositionMap};
use crate::status::StatusSink;

/// One batch stitching run: input directory in, mosaic PNG out.
#[derive(Debug)]
pub struct Stitcher {
    input_dir: PathBuf,
    output_path: PathBuf,
    config: StitchConfig,
    sink: StatusSink,
}

impl Stitcher {
    /// Validate the configuration and build a runnable engine.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        config: StitchConfig,
    ) -> StitchResult<Self> {
        config.validate()?;
        Ok(Self {
            input_dir: input_dir.into(),
            output_path: output_path.into(),
            config,
            sink: StatusSink::disconnected(),
        })
    }

    /// Attach the engine-to-host status channel.
    pub fn with_status_sink(mut self, sink: StatusSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Run the full pipeline. On failure the error is also surfaced as
    /// a single `Error` status event, after best-effort cleanup.
    pub fn run(&self) -> StitchResult<()> {
        match self.run_pipeline() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.sink.error(format!("[{}] {}", e.kind(), e));
                Err(e)
            }
        }
    }

    fn run_pipeline(&self) -> StitchResult<()> {
        let config = &self.config;
        let mut cache = TileCache::new(config.cache_max_items);

        // Stage 1: index and verify the grid.
        let index = TileIndex::scan(&self.input_dir)?;
        index.verify(&self.sink)?;
        info!(
            tiles = index.tiles.len(),
            width = index.base_width,
            height = index.base_height,
            "grid verified"
        );

        let render_ids: Vec<TileId> = index
            .tiles
            .iter()
            .copied()
            .filter(|id| {
                config
                    .stitch_range
                    .map(|range| range.contains(*id))
                    .unwrap_or(true)
            })
            .collect();
        if render_ids.is_empty() {
            return Err(StitchError::config(
                "stitch_range",
                "selects no tiles to render",
            ));
        }

        // Stages 2-4, or the single-tile bypass.
        let (matches, positions) = if render_ids.len() == 1 {
            self.sink
                .status("single tile selected; skipping matching and optimization.");
            let mut positions = PositionMap::new();
            positions.insert(render_ids[0], (0, 0));
            (MatchSet::default(), positions)
        } else {
            let matches = matcher::match_all(&index, &mut cache, config, &self.sink)?;
            let initial = solver::estimate_initial_positions(&index, &matches, &self.sink)?;
            let refined = solver::refine_positions(&matches, &initial, config, &self.sink);
            (matches, refined)
        };

        // Sidecars are diagnostics; their failures downgrade to notes.
        if config.generate_preview {
            let path = config.preview_destination(&self.output_path);
            if let Err(e) = sidecar::write_preview(
                &index,
                &positions,
                &mut cache,
                config,
                &self.sink,
                &path,
            ) {
                self.sink.status(format!("preview generation failed: {}", e));
            }
        }
        if config.generate_heatmap {
            let path = config.heatmap_destination(&self.output_path);
            if let Err(e) = sidecar::write_heatmap(&matches, &self.sink, &path) {
                self.sink.status(format!("heatmap generation failed: {}", e));
            }
        }

        // Stage 5: composite and crop.
        let (out_w, out_h) =
            compose::render(&index, &positions, config, &self.sink, &self.output_path)?;
        self.sink.done(format!(
            "stitching complete: {} ({}x{})",
            self.output_path.display(),
            out_w,
            out_h
        ));
        Ok(())
    }
}
