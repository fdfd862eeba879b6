//! Tile discovery and grid verification.
//!
//! Tiles are named `R<digits>_C<digits>.<ext>` (case-insensitive). The
//! indexer scans the input directory, parses every matching name into a
//! [`TileId`], derives the grid extents from the row/column values that
//! are actually present, and probes the first tile for the base shape
//! every other tile must share. The tile set must form a dense
//! rectangle; verification reports the first five missing names and
//! aborts the run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{StitchError, StitchResult};
use crate::imgio;
use crate::status::StatusSink;

/// Grid coordinate of one tile, parsed from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub r: u32,
    pub c: u32,
}

impl TileId {
    pub fn new(r: u32, c: u32) -> Self {
        Self { r, c }
    }

    /// Canonical file name for this tile, used in error reports.
    pub fn canonical_name(&self) -> String {
        format!("R{:02}_C{:02}.png", self.r, self.c)
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.r, self.c)
    }
}

/// Extents and the sorted unique row/column values present on disk.
#[derive(Debug, Clone)]
pub struct GridInfo {
    pub min_r: u32,
    pub max_r: u32,
    pub min_c: u32,
    pub max_c: u32,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
}

impl GridInfo {
    pub fn row_index(&self, r: u32) -> Option<usize> {
        self.rows.binary_search(&r).ok()
    }

    pub fn col_index(&self, c: u32) -> Option<usize> {
        self.cols.binary_search(&c).ok()
    }

    pub fn tile_count(&self) -> usize {
        self.rows.len() * self.cols.len()
    }
}

/// Result of stage 1: the verified tile set plus the base tile shape.
#[derive(Debug)]
pub struct TileIndex {
    pub grid: GridInfo,
    /// All tiles in `(r, c)` sort order.
    pub tiles: Vec<TileId>,
    pub base_width: u32,
    pub base_height: u32,
    pub base_channels: u8,
    paths: HashMap<TileId, PathBuf>,
}

impl TileIndex {
    /// Scan `input_dir` for tile files and probe the base shape.
    ///
    /// Non-matching files are ignored. The first tile in sort order
    /// defines the shape `(H, W, C)`; a base tile that cannot be read,
    /// or has a bit depth or channel count outside 8-bit RGB/RGBA, is an
    /// input error.
    pub fn scan(input_dir: &Path) -> StitchResult<Self> {
        let pattern = Regex::new(r"(?i)^R(\d+)_C(\d+)\.(?:png|jpe?g|bmp|tiff?)$")
            .expect("tile filename pattern is valid");

        let entries = std::fs::read_dir(input_dir)
            .map_err(|e| StitchError::io(format!("scanning {}", input_dir.display()), e))?;

        let mut paths: HashMap<TileId, PathBuf> = HashMap::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| StitchError::io(format!("scanning {}", input_dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(caps) = pattern.captures(name) else {
                continue;
            };
            let (Ok(r), Ok(c)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
                // Digit runs longer than a u32 are not tile indices.
                warn!(name, "ignoring tile name with out-of-range index");
                continue;
            };
            let id = TileId::new(r, c);
            if let Some(previous) = paths.insert(id, entry.path()) {
                warn!(
                    tile = %id,
                    "duplicate tile name, replacing {}",
                    previous.display()
                );
            }
        }

        if paths.is_empty() {
            return Err(StitchError::input(format!(
                "no files matching R<digits>_C<digits>.png found in {}",
                input_dir.display()
            )));
        }

        let mut tiles: Vec<TileId> = paths.keys().copied().collect();
        tiles.sort();

        let mut rows: Vec<u32> = tiles.iter().map(|t| t.r).collect();
        rows.sort_unstable();
        rows.dedup();
        let mut cols: Vec<u32> = tiles.iter().map(|t| t.c).collect();
        cols.sort_unstable();
        cols.dedup();

        let grid = GridInfo {
            min_r: rows[0],
            max_r: *rows.last().expect("rows nonempty"),
            min_c: cols[0],
            max_c: *cols.last().expect("cols nonempty"),
            rows,
            cols,
        };

        let base_path = &paths[&tiles[0]];
        let base = imgio::read_image(base_path).map_err(|e| {
            StitchError::input(format!(
                "failed to read base tile {}: {}",
                base_path.display(),
                e
            ))
        })?;
        let base_channels = match base.color() {
            image::ColorType::Rgb8 => 3,
            image::ColorType::Rgba8 => 4,
            other => {
                return Err(StitchError::input(format!(
                    "base tile {} has unsupported pixel format {:?} (need 8-bit RGB or RGBA)",
                    base_path.display(),
                    other
                )));
            }
        };

        debug!(
            tiles = tiles.len(),
            rows = grid.rows.len(),
            cols = grid.cols.len(),
            width = base.width(),
            height = base.height(),
            channels = base_channels,
            "tile grid indexed"
        );

        Ok(Self {
            grid,
            tiles,
            base_width: base.width(),
            base_height: base.height(),
            base_channels,
            paths,
        })
    }

    pub fn path_of(&self, id: TileId) -> Option<&Path> {
        self.paths.get(&id).map(PathBuf::as_path)
    }

    /// Enforce that every `(r, c)` in `rows × cols` has a file.
    pub fn verify(&self, sink: &StatusSink) -> StitchResult<()> {
        sink.status("verifying grid completeness...");
        let mut missing: Vec<String> = Vec::new();
        for &r in &self.grid.rows {
            for &c in &self.grid.cols {
                let id = TileId::new(r, c);
                if !self.paths.contains_key(&id) {
                    missing.push(id.canonical_name());
                }
            }
        }
        if !missing.is_empty() {
            let shown = missing.iter().take(5).cloned().collect::<Vec<_>>();
            return Err(StitchError::input(format!(
                "{} tile file(s) missing; the capture is incomplete or the input \
                 directory is wrong. First missing: {}",
                missing.len(),
                shown.join(", ")
            )));
        }
        sink.status("grid is complete.");
        Ok(())
    }
}
