//! Stages 3 and 4: lattice estimation and global refinement.
//!
//! The initial estimate assumes the capture moved by a constant step
//! per column and per row: the component-wise median of the retained
//! horizontal and vertical offsets gives the two lattice basis vectors,
//! and every tile lands at `col_index·H + row_index·V`. The global
//! solve then lets each tile drift from that lattice exactly as far as
//! the pairwise evidence, weighted by confidence, pulls it — with a
//! weak anchor back to the lattice so accumulated pairwise error cannot
//! fold the mosaic, and the first tile pinned to remove the translation
//! null space.

pub mod sparse;

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::StitchConfig;
use crate::error::{StitchError, StitchResult};
use crate::grid::{TileId, TileIndex};
use crate::matcher::MatchSet;
use crate::status::StatusSink;
use self::sparse::{LeastSquaresBuilder, lsqr};

/// Tile placements in canvas space. BTreeMap keeps `(r, c)` order,
/// which is also the render order.
pub type PositionMap = BTreeMap<TileId, (i64, i64)>;

/// Integer median matching `int(numpy.median(...))`: the middle value,
/// or the truncated mean of the two middle values for even counts.
fn median_i32(values: &mut Vec<i32>) -> i32 {
    debug_assert!(!values.is_empty());
    values.sort_unstable();
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        ((values[n / 2 - 1] as f64 + values[n / 2] as f64) / 2.0) as i32
    }
}

/// Stage 3: place every tile on the rigid lattice spanned by the median
/// horizontal and vertical offsets.
///
/// A direction that cannot have neighbor pairs (single row or single
/// column) contributes the zero vector; a direction that exists in the
/// grid but has no retained matches is a [`StitchError::NoMatch`].
pub fn estimate_initial_positions(
    index: &TileIndex,
    matches: &MatchSet,
    sink: &StatusSink,
) -> StitchResult<PositionMap> {
    sink.status("computing representative offsets...");
    if matches.is_empty() {
        return Err(StitchError::no_match(
            "no pairwise match survived the score threshold; try lowering it",
        ));
    }

    let mut h_x = Vec::new();
    let mut h_y = Vec::new();
    let mut v_x = Vec::new();
    let mut v_y = Vec::new();
    for m in matches.iter() {
        if m.direction.is_horizontal() {
            h_x.push(m.offset.0);
            h_y.push(m.offset.1);
        } else {
            v_x.push(m.offset.0);
            v_y.push(m.offset.1);
        }
    }

    let needs_h = index.grid.cols.len() > 1;
    let needs_v = index.grid.rows.len() > 1;
    if needs_h && h_x.is_empty() {
        return Err(StitchError::no_match(
            "no horizontal matches were found between adjacent columns",
        ));
    }
    if needs_v && v_x.is_empty() {
        return Err(StitchError::no_match(
            "no vertical matches were found between adjacent rows",
        ));
    }

    let h_med = if h_x.is_empty() {
        (0, 0)
    } else {
        (median_i32(&mut h_x), median_i32(&mut h_y))
    };
    let v_med = if v_x.is_empty() {
        (0, 0)
    } else {
        (median_i32(&mut v_x), median_i32(&mut v_y))
    };

    sink.status(format!("representative H offset: {:?}", h_med));
    sink.status(format!("representative V offset: {:?}", v_med));
    sink.status("assigning initial lattice coordinates...");

    let mut positions = PositionMap::new();
    for (r_idx, &r) in index.grid.rows.iter().enumerate() {
        for (c_idx, &c) in index.grid.cols.iter().enumerate() {
            let x = c_idx as i64 * h_med.0 as i64 + r_idx as i64 * v_med.0 as i64;
            let y = c_idx as i64 * h_med.1 as i64 + r_idx as i64 * v_med.1 as i64;
            positions.insert(TileId::new(r, c), (x, y));
        }
    }
    Ok(positions)
}

/// Stage 4: weighted least-squares refinement.
///
/// Three row groups: pair constraints weighted by
/// `score²·(1 + 0.1·ln(m+1))·(1 + 0.1·template_val)`, a grid anchor of
/// strength `initial_pos_weight` holding every tile near its lattice
/// position, and two unit rows pinning the first tile at the origin.
pub fn refine_positions(
    matches: &MatchSet,
    initial: &PositionMap,
    config: &StitchConfig,
    sink: &StatusSink,
) -> PositionMap {
    sink.status("running global optimization...");

    let keys: Vec<TileId> = initial.keys().copied().collect();
    let key_to_idx: BTreeMap<TileId, usize> =
        keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();

    let valid: Vec<_> = matches
        .iter()
        .filter(|m| key_to_idx.contains_key(&m.src) && key_to_idx.contains_key(&m.dst))
        .collect();
    if valid.is_empty() {
        return initial.clone();
    }

    let n = keys.len();
    let mut builder = LeastSquaresBuilder::new(2 * n);

    for m in &valid {
        let i1 = key_to_idx[&m.src];
        let i2 = key_to_idx[&m.dst];
        let score = m.score as f64;
        let mut weight = score * score;
        weight *= 1.0 + ((m.match_count as f64) + 1.0).ln() * 0.1;
        weight *= 1.0 + (m.template_val as f64) * 0.1;

        builder.add_row(
            &[(i1 * 2, -weight), (i2 * 2, weight)],
            m.offset.0 as f64 * weight,
        );
        builder.add_row(
            &[(i1 * 2 + 1, -weight), (i2 * 2 + 1, weight)],
            m.offset.1 as f64 * weight,
        );
    }

    // Grid anchor: drift from the lattice costs λ per pixel, which is
    // what keeps accumulated pairwise error from folding the mosaic.
    let lambda = config.initial_pos_weight;
    for key in &keys {
        let idx = key_to_idx[key];
        let (x0, y0) = initial[key];
        builder.add_row(&[(idx * 2, lambda)], x0 as f64 * lambda);
        builder.add_row(&[(idx * 2 + 1, lambda)], y0 as f64 * lambda);
    }

    // Gauge fixing: pin the first tile at the origin.
    builder.add_row(&[(0, 1.0)], 0.0);
    builder.add_row(&[(1, 1.0)], 0.0);

    let (a, b) = builder.build();
    let x0: Vec<f64> = keys
        .iter()
        .flat_map(|k| {
            let (x, y) = initial[k];
            [x as f64, y as f64]
        })
        .collect();

    let solution = lsqr(&a, &b, &x0, config.lsqr_iter);

    let mut refined = PositionMap::new();
    for (i, key) in keys.iter().enumerate() {
        refined.insert(
            *key,
            (
                solution[i * 2].round() as i64,
                solution[i * 2 + 1].round() as i64,
            ),
        );
    }
    debug!(tiles = n, constraints = valid.len(), "global solve finished");
    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Direction, PairMatch};

    fn synthetic_index(rows: Vec<u32>, cols: Vec<u32>) -> TileIndex {
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

    fn pair(src: TileId, dst: TileId, offset: (i32, i32), direction: Direction) -> PairMatch {
        PairMatch {
            src,
            dst,
            offset,
            score: 0.95,
            direction,
            match_count: 0,
            template_val: 0.95,
        }
    }

    fn lattice_matches(index: &TileIndex, h: (i32, i32), v: (i32, i32)) -> MatchSet {
        let mut set = MatchSet::default();
        for &r in &index.grid.rows {
            for &c in &index.grid.cols {
                if index.grid.col_index(c).unwrap() + 1 < index.grid.cols.len() {
                    set.matches.push(pair(
                        TileId::new(r, c),
                        TileId::new(r, c + 1),
                        h,
                        Direction::HForward,
                    ));
                }
                if index.grid.row_index(r).unwrap() + 1 < index.grid.rows.len() {
                    set.matches
                        .push(pair(TileId::new(r, c), TileId::new(r + 1, c), v, Direction::V));
                }
            }
        }
        set
    }

    #[test]
    fn test_initial_positions_form_lattice() {
        let index = synthetic_index(vec![0, 1], vec![0, 1, 2]);
        let matches = lattice_matches(&index, (80, 2), (-3, 60));
        let positions =
            estimate_initial_positions(&index, &matches, &StatusSink::disconnected()).unwrap();

        assert_eq!(positions[&TileId::new(0, 0)], (0, 0));
        assert_eq!(positions[&TileId::new(0, 2)], (160, 4));
        assert_eq!(positions[&TileId::new(1, 1)], (77, 62));

        // Lattice invariant: every pair offset is the matching basis
        // vector.
        for m in matches.iter() {
            let (sx, sy) = positions[&m.src];
            let (dx, dy) = positions[&m.dst];
            let expected = if m.direction.is_horizontal() {
                (80, 2)
            } else {
                (-3, 60)
            };
            assert_eq!((dx - sx, dy - sy), (expected.0 as i64, expected.1 as i64));
        }
    }

    #[test]
    fn test_empty_match_set_is_no_match() {
        let index = synthetic_index(vec![0, 1], vec![0, 1]);
        let err = estimate_initial_positions(&index, &MatchSet::default(), &StatusSink::disconnected())
            .unwrap_err();
        assert_eq!(err.kind(), "no-match");
    }

    #[test]
    fn test_single_row_grid_needs_no_vertical_matches() {
        let index = synthetic_index(vec![0], vec![0, 1, 2]);
        let mut set = MatchSet::default();
        set.matches.push(pair(
            TileId::new(0, 0),
            TileId::new(0, 1),
            (80, 0),
            Direction::HForward,
        ));
        set.matches.push(pair(
            TileId::new(0, 1),
            TileId::new(0, 2),
            (80, 0),
            Direction::HForward,
        ));
        let positions =
            estimate_initial_positions(&index, &set, &StatusSink::disconnected()).unwrap();
        assert_eq!(positions[&TileId::new(0, 2)], (160, 0));
    }

    #[test]
    fn test_missing_required_direction_is_no_match() {
        let index = synthetic_index(vec![0, 1], vec![0, 1]);
        let mut set = MatchSet::default();
        set.matches.push(pair(
            TileId::new(0, 0),
            TileId::new(0, 1),
            (80, 0),
            Direction::HForward,
        ));
        // Two rows but no vertical matches.
        let err =
            estimate_initial_positions(&index, &set, &StatusSink::disconnected()).unwrap_err();
        assert_eq!(err.kind(), "no-match");
    }

    #[test]
    fn test_refine_pins_first_tile_and_honors_offsets() {
        let index = synthetic_index(vec![0], vec![0, 1, 2, 3, 4]);
        // Jittered horizontal chain: steps 80, 78, 82, 80.
        let steps = [80, 78, 82, 80];
        let mut set = MatchSet::default();
        for (i, &step) in steps.iter().enumerate() {
            set.matches.push(pair(
                TileId::new(0, i as u32),
                TileId::new(0, i as u32 + 1),
                (step, 0),
                Direction::HForward,
            ));
        }
        let initial =
            estimate_initial_positions(&index, &set, &StatusSink::disconnected()).unwrap();
        let refined = refine_positions(&set, &initial, &StitchConfig::default(), &StatusSink::disconnected());

        assert_eq!(refined[&TileId::new(0, 0)], (0, 0));
        // Refined positions track the cumulative measured steps, not
        // the rigid 80-px lattice.
        let mut expected = 0i64;
        for (i, &step) in steps.iter().enumerate() {
            expected += step as i64;
            let (x, y) = refined[&TileId::new(0, i as u32 + 1)];
            assert!(
                (x - expected).abs() <= 1,
                "tile {} at {} expected {}",
                i + 1,
                x,
                expected
            );
            assert_eq!(y, 0);
        }
    }

    #[test]
    fn test_median_even_count_truncates_like_numpy() {
        assert_eq!(median_i32(&mut vec![1, 2]), 1);
        assert_eq!(median_i32(&mut vec![-1, -2]), -1);
        assert_eq!(median_i32(&mut vec![3]), 3);
        assert_eq!(median_i32(&mut vec![1, 2, 3, 10]), 2);
    }
}
