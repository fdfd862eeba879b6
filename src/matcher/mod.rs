//! Stage 2: pairwise offset discovery.
//!
//! Every tile is matched against its right and lower neighbor with a
//! hybrid strategy: a normalized cross-correlation template match over
//! the expected overlap strip first, and a feature match (FAST + BRIEF
//! + translation RANSAC) as the fallback when the template peak is
//! weak. Jobs follow the capture's boustrophedon scroll order and may
//! be restricted to a stitch window; a job survives the window filter
//! iff its *source* tile lies inside.
//!
//! A retained match records the offset `dst − src` in canvas space for
//! every direction — the backward tag only marks which way the capture
//! was scrolling on that row.

mod features;
mod template;

pub use self::features::FeatureOutcome;

use tracing::debug;

use crate::cache::TileCache;
use crate::config::{StitchConfig, StitchRange};
use crate::error::{StitchError, StitchResult};
use crate::grid::{TileId, TileIndex};
use crate::status::StatusSink;

/// Which neighbor relation a job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Right neighbor, even (left-to-right) capture row.
    HForward,
    /// Right neighbor, odd (right-to-left) capture row.
    HBackward,
    /// Lower neighbor.
    V,
}

impl Direction {
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::HForward | Direction::HBackward)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::HForward => "h_forward",
            Direction::HBackward => "h_backward",
            Direction::V => "v",
        }
    }
}

/// One neighbor pair to match.
#[derive(Debug, Clone, Copy)]
pub struct MatchJob {
    pub src: TileId,
    pub dst: TileId,
    pub direction: Direction,
}

/// A retained pairwise match. `offset` places `dst` at
/// `src_position + offset`.
#[derive(Debug, Clone, Copy)]
pub struct PairMatch {
    pub src: TileId,
    pub dst: TileId,
    pub offset: (i32, i32),
    pub score: f32,
    pub direction: Direction,
    pub match_count: u32,
    pub template_val: f32,
}

/// All matches that survived effective-score thresholding.
#[derive(Debug, Default)]
pub struct MatchSet {
    pub matches: Vec<PairMatch>,
}

impl MatchSet {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairMatch> {
        self.matches.iter()
    }
}

/// Build the neighbor-pair job list in boustrophedon traversal order.
///
/// Columns run left-to-right on even row indices and right-to-left on
/// odd ones, mirroring the scroll pattern of the capture; horizontal
/// jobs are tagged accordingly. The pair itself is always
/// `(tile, right-or-lower neighbor)`.
pub fn build_jobs(index: &TileIndex, window: Option<&StitchRange>) -> Vec<MatchJob> {
    let rows = &index.grid.rows;
    let cols = &index.grid.cols;
    let mut jobs = Vec::new();

    for (r_idx, &r) in rows.iter().enumerate() {
        let forward = r_idx % 2 == 0;
        let direction = if forward {
            Direction::HForward
        } else {
            Direction::HBackward
        };
        let col_order: Vec<usize> = if forward {
            (0..cols.len()).collect()
        } else {
            (0..cols.len()).rev().collect()
        };
        for c_idx in col_order {
            let src = TileId::new(r, cols[c_idx]);
            if c_idx + 1 < cols.len() {
                jobs.push(MatchJob {
                    src,
                    dst: TileId::new(r, cols[c_idx + 1]),
                    direction,
                });
            }
            if r_idx + 1 < rows.len() {
                jobs.push(MatchJob {
                    src,
                    dst: TileId::new(rows[r_idx + 1], cols[c_idx]),
                    direction: Direction::V,
                });
            }
        }
    }

    if let Some(window) = window {
        jobs.retain(|job| window.contains(job.src));
    }
    jobs
}

/// Run the hybrid matcher over every job. Progress spans `0..50`.
///
/// Tile read failures and shape mismatches skip the pair with a status
/// note; they never abort the run.
pub fn match_all(
    index: &TileIndex,
    cache: &mut TileCache,
    config: &StitchConfig,
    sink: &StatusSink,
) -> StitchResult<MatchSet> {
    let jobs = build_jobs(index, config.stitch_range.as_ref());
    if jobs.is_empty() {
        return Err(StitchError::no_match(
            "no neighbor pairs to match in the selected range",
        ));
    }

    sink.status(format!("hybrid matching {} neighbor pairs...", jobs.len()));
    let mut set = MatchSet::default();

    for (i, job) in jobs.iter().enumerate() {
        sink.status(format!(
            "matching: {} -> {} ({})",
            job.src,
            job.dst,
            job.direction.as_str()
        ));
        sink.pair(job.src, job.dst);

        let outcome = match_one(index, cache, config, job);
        match outcome {
            Ok(Some(m)) => set.matches.push(m),
            Ok(None) => {}
            Err(e) => sink.status(format!(
                "skipping pair {} -> {}: {}",
                job.src, job.dst, e
            )),
        }

        let progress = ((i + 1) * 50 / jobs.len()) as u8;
        sink.progress(progress);
    }

    debug!(
        retained = set.len(),
        jobs = jobs.len(),
        "pairwise matching finished"
    );
    Ok(set)
}

fn match_one(
    index: &TileIndex,
    cache: &mut TileCache,
    config: &StitchConfig,
    job: &MatchJob,
) -> StitchResult<Option<PairMatch>> {
    let src_path = index
        .path_of(job.src)
        .ok_or_else(|| StitchError::input(format!("no file for tile {}", job.src)))?
        .to_path_buf();
    let dst_path = index
        .path_of(job.dst)
        .ok_or_else(|| StitchError::input(format!("no file for tile {}", job.dst)))?
        .to_path_buf();

    let src_gray = cache.read_gray(&src_path, 1)?;
    let dst_gray = cache.read_gray(&dst_path, 1)?;

    let base_dims = (index.base_width, index.base_height);
    if src_gray.dimensions() != base_dims || dst_gray.dimensions() != base_dims {
        return Err(StitchError::input(format!(
            "tile shape deviates from base {}x{}",
            index.base_width, index.base_height
        )));
    }

    let overlap = if job.direction.is_horizontal() {
        config.overlap_h()
    } else {
        config.overlap_v()
    };
    let (template_offset, template_peak) =
        template::match_template_pair(&src_gray, &dst_gray, job.direction, overlap);

    let template_val = template_peak;
    let (offset, score, match_count) = match template_offset {
        Some(offset) => (Some(offset), template_peak, 0u32),
        None => {
            let fallback =
                features::match_features(&src_gray, &dst_gray, config.nfeatures);
            (fallback.offset, fallback.score, fallback.match_count)
        }
    };

    let Some(offset) = offset else {
        debug!(src = %job.src, dst = %job.dst, peak = template_peak, "no usable match");
        return Ok(None);
    };

    // Confidence from many feature inliers outranks a bare template
    // peak, so scale by log inlier count before thresholding.
    let effective = if score > 0.0 && match_count > 0 {
        score * ((match_count as f32) + 1.0).ln()
    } else {
        score
    };

    debug!(
        src = %job.src,
        dst = %job.dst,
        ?offset,
        score,
        match_count,
        effective,
        "pair matched"
    );

    if effective > config.min_score_threshold {
        Ok(Some(PairMatch {
            src: job.src,
            dst: job.dst,
            offset,
            score,
            direction: job.direction,
            match_count,
            template_val,
        }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(r_min: u32, r_max: u32, c_min: u32, c_max: u32) -> StitchRange {
        StitchRange {
            r_min,
            r_max,
            c_min,
            c_max,
        }
    }

    fn index_for(rows: Vec<u32>, cols: Vec<u32>) -> TileIndex {
        // Build a synthetic on-disk grid so scan() does the work.
        let dir = tempfile::tempdir().unwrap();
        for &r in &rows {
            for &c in &cols {
                let name = format!("R{:02}_C{:02}.png", r, c);
                crate::imgio::write_png_rgb(&dir.path().join(name), &image::RgbImage::new(4, 4))
                    .unwrap();
            }
        }
        TileIndex::scan(dir.path()).unwrap()
    }

    #[test]
    fn test_boustrophedon_job_order_and_tags() {
        let index = index_for(vec![0, 1], vec![0, 1, 2]);
        let jobs = build_jobs(&index, None);
        // 2 rows x 3 cols: 2*2 horizontal + 3 vertical = 7 jobs.
        assert_eq!(jobs.len(), 7);

        let h_jobs: Vec<_> = jobs
            .iter()
            .filter(|j| j.direction.is_horizontal())
            .collect();
        assert_eq!(h_jobs.len(), 4);
        // Even row tagged forward, odd row tagged backward; the pair is
        // always (tile, right neighbor) in both cases.
        for job in &h_jobs {
            assert_eq!(job.dst.r, job.src.r);
            assert_eq!(job.dst.c, job.src.c + 1);
            let expected = if job.src.r == 0 {
                Direction::HForward
            } else {
                Direction::HBackward
            };
            assert_eq!(job.direction, expected);
        }
        // Odd rows enumerate right-to-left.
        let backward: Vec<_> = h_jobs.iter().filter(|j| j.src.r == 1).collect();
        assert_eq!(backward[0].src.c, 1);
        assert_eq!(backward[1].src.c, 0);
    }

    #[test]
    fn test_window_filters_by_source_tile() {
        let index = index_for(vec![0, 1, 2], vec![0, 1, 2]);
        let window = range(0, 0, 0, 2);
        let jobs = build_jobs(&index, Some(&window));
        assert!(!jobs.is_empty());
        for job in &jobs {
            assert_eq!(job.src.r, 0);
        }
        // Vertical jobs out of row 0 survive even though their dst is
        // outside the window.
        assert!(jobs.iter().any(|j| j.direction == Direction::V));
    }

    #[test]
    fn test_single_tile_grid_has_no_jobs() {
        let index = index_for(vec![3], vec![7]);
        assert!(build_jobs(&index, None).is_empty());
    }
}
