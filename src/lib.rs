//! # Tile Stitcher
//!
//! Stitches a dense R×C grid of overlapping viewport captures (files
//! named `R<row>_C<col>.png`) into one seamless mosaic PNG.
//!
//! ## Pipeline
//!
//! The engine is a five-stage batch pipeline with strict sequential
//! dependencies:
//!
//! 1. **Grid indexing** — enumerate tiles, parse `(row, col)` from the
//!    filenames, verify the grid is complete, learn the base tile shape.
//! 2. **Pairwise matching** — for every right/lower neighbor pair,
//!    recover an integer offset plus a confidence: normalized
//!    cross-correlation over the expected overlap strip first, sparse
//!    feature matching (FAST + BRIEF + translation RANSAC) as the
//!    fallback.
//! 3. **Initial estimation** — place all tiles on the rigid lattice
//!    spanned by the median horizontal and vertical offsets.
//! 4. **Global optimization** — a weighted sparse least-squares solve
//!    (LSQR) balancing pairwise evidence against a grid anchor, with
//!    the first tile pinned at the origin.
//! 5. **Composition** — render opaquely onto a memory-mapped on-disk
//!    canvas, auto-crop to the coverage mask, emit the PNG.
//!
//! Progress, the current pair, errors, and completion stream to the
//! host over a bounded channel of [`StatusEvent`]s; the engine itself
//! is single-threaded and is expected to run on a worker thread.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tile_stitcher::{StitchConfig, Stitcher, status_channel};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, events) = status_channel(256);
//!     let stitcher = Stitcher::new("captures/", "mosaic.png", StitchConfig::default())?
//!         .with_status_sink(sink);
//!
//!     let worker = std::thread::spawn(move || stitcher.run());
//!     for event in events {
//!         println!("{:?}", event);
//!     }
//!     worker.join().unwrap()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod grid;
pub mod imgio;
pub mod matcher;
pub mod pipeline;
pub mod scale;
pub mod sidecar;
pub mod solver;
pub mod status;

pub use config::{StitchConfig, StitchRange};
pub use error::{StitchError, StitchResult};
pub use grid::TileId;
pub use pipeline::Stitcher;
pub use status::{StatusEvent, StatusSink, status_channel};
