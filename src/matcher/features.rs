//! Feature stage of the hybrid matcher.
//!
//! When the template peak is weak — low overlap, drift off the expected
//! axis, repeated structure — the matcher falls back to sparse
//! features: FAST-9 corners, 256-bit BRIEF descriptors sampled from a
//! blurred patch, Hamming two-nearest-neighbor matching with Lowe's
//! ratio test, and a translation-only RANSAC that escalates its
//! reprojection threshold until enough inliers agree. Rotation and
//! scale are not modeled; tiles come from a scrolling viewport.
//!
//! The whole stage is deterministic: the BRIEF sampling pattern comes
//! from a fixed-seed generator and RANSAC proposes candidates in match
//! order instead of sampling at random, so reruns produce identical
//! offsets.

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;

const DESCRIPTOR_WORDS: usize = 4;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_WORDS * 64;
/// BRIEF samples live in a 31×31 patch around the keypoint.
const PATCH_RADIUS: i32 = 15;
const FAST_THRESHOLD: u8 = 20;
const LOWE_RATIO: f32 = 0.75;
/// Both sides need at least this many descriptors, and the ratio test
/// must leave at least this many candidate matches.
const MIN_MATCHES: usize = 8;
const MIN_INLIERS: usize = 6;
const RANSAC_THRESHOLDS: [f32; 3] = [3.0, 6.0, 10.0];
/// Cap on translation proposals per threshold pass.
const MAX_PROPOSALS: usize = 512;
const PATTERN_SEED: u64 = 0x5EED_1E55_0FF5_E715;

/// 256-bit binary descriptor.
type Descriptor = [u64; DESCRIPTOR_WORDS];

/// Result of the feature stage. `match_count` is reported even when no
/// transform was accepted, since it feeds the effective-score weight.
#[derive(Debug, Clone, Copy)]
pub struct FeatureOutcome {
    pub offset: Option<(i32, i32)>,
    pub score: f32,
    pub match_count: u32,
}

impl FeatureOutcome {
    fn none(match_count: u32) -> Self {
        Self {
            offset: None,
            score: 0.0,
            match_count,
        }
    }
}

/// Estimate the `dst − src` translation from sparse feature matches.
pub fn match_features(src: &GrayImage, dst: &GrayImage, nfeatures: usize) -> FeatureOutcome {
    let pattern = sampling_pattern();
    let (kp1, des1) = detect_and_describe(src, nfeatures, &pattern);
    let (kp2, des2) = detect_and_describe(dst, nfeatures, &pattern);
    if des1.len() < MIN_MATCHES || des2.len() < MIN_MATCHES {
        return FeatureOutcome::none(0);
    }

    let good = ratio_test_matches(&des1, &des2);
    let match_count = good.len() as u32;
    if good.len() < MIN_MATCHES {
        return FeatureOutcome::none(match_count);
    }

    let pairs: Vec<((f32, f32), (f32, f32))> = good
        .iter()
        .map(|&(i, j)| (kp1[i], kp2[j]))
        .collect();

    for threshold in RANSAC_THRESHOLDS {
        if let Some((translation, inliers)) = ransac_translation(&pairs, threshold) {
            if inliers >= MIN_INLIERS {
                let score = inliers as f32 / pairs.len() as f32;
                // The transform maps src coordinates onto dst; the
                // canvas offset of dst relative to src is its negation.
                let offset = (
                    -(translation.0.round() as i32),
                    -(translation.1.round() as i32),
                );
                return FeatureOutcome {
                    offset: Some(offset),
                    score,
                    match_count,
                };
            }
        }
    }

    FeatureOutcome::none(match_count)
}

/// FAST corners (strongest first, capped at `nfeatures`) plus BRIEF
/// descriptors sampled from a blurred copy. Corners too close to the
/// border to fit the sampling patch are dropped.
fn detect_and_describe(
    img: &GrayImage,
    nfeatures: usize,
    pattern: &[((i32, i32), (i32, i32))],
) -> (Vec<(f32, f32)>, Vec<Descriptor>) {
    let (w, h) = img.dimensions();
    if w <= 2 * PATCH_RADIUS as u32 || h <= 2 * PATCH_RADIUS as u32 {
        return (Vec::new(), Vec::new());
    }

    let mut corners = corners_fast9(img, FAST_THRESHOLD);
    corners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    corners.truncate(nfeatures);

    let blurred = gaussian_blur_f32(img, 1.4);

    let mut keypoints = Vec::with_capacity(corners.len());
    let mut descriptors = Vec::with_capacity(corners.len());
    for corner in &corners {
        let x = corner.x as i32;
        let y = corner.y as i32;
        if x < PATCH_RADIUS
            || y < PATCH_RADIUS
            || x + PATCH_RADIUS >= w as i32
            || y + PATCH_RADIUS >= h as i32
        {
            continue;
        }
        let mut descriptor: Descriptor = [0; DESCRIPTOR_WORDS];
        for (bit, &((ax, ay), (bx, by))) in pattern.iter().enumerate() {
            let a = blurred.get_pixel((x + ax) as u32, (y + ay) as u32)[0];
            let b = blurred.get_pixel((x + bx) as u32, (y + by) as u32)[0];
            if a < b {
                descriptor[bit / 64] |= 1u64 << (bit % 64);
            }
        }
        keypoints.push((corner.x as f32, corner.y as f32));
        descriptors.push(descriptor);
    }
    (keypoints, descriptors)
}

/// The fixed BRIEF test pattern: point pairs inside the patch, drawn
/// from a seeded generator so every run (and both tiles of a pair) use
/// the same tests.
fn sampling_pattern() -> Vec<((i32, i32), (i32, i32))> {
    let mut rng = Lcg::new(PATTERN_SEED);
    (0..DESCRIPTOR_BITS)
        .map(|_| {
            (
                (rng.next_patch_coord(), rng.next_patch_coord()),
                (rng.next_patch_coord(), rng.next_patch_coord()),
            )
        })
        .collect()
}

/// Brute-force Hamming 2-NN with Lowe's ratio test. Returns index pairs
/// `(query, target)`.
fn ratio_test_matches(des1: &[Descriptor], des2: &[Descriptor]) -> Vec<(usize, usize)> {
    let mut good = Vec::new();
    for (i, d1) in des1.iter().enumerate() {
        let mut best = u32::MAX;
        let mut second = u32::MAX;
        let mut best_j = 0usize;
        for (j, d2) in des2.iter().enumerate() {
            let dist = hamming(d1, d2);
            if dist < best {
                second = best;
                best = dist;
                best_j = j;
            } else if dist < second {
                second = dist;
            }
        }
        if second != u32::MAX && (best as f32) < LOWE_RATIO * (second as f32) {
            good.push((i, best_j));
        }
    }
    good
}

#[inline]
fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Translation-only RANSAC. Each candidate match proposes the
/// translation it implies; the proposal with the largest consensus
/// wins and is refined as the inlier mean. Proposals are enumerated in
/// order, which keeps the estimate deterministic.
fn ransac_translation(
    pairs: &[((f32, f32), (f32, f32))],
    threshold: f32,
) -> Option<((f32, f32), usize)> {
    let threshold_sq = threshold * threshold;
    let mut best_inliers: Vec<usize> = Vec::new();

    for &((sx, sy), (dx, dy)) in pairs.iter().take(MAX_PROPOSALS) {
        let t = (dx - sx, dy - sy);
        let inliers: Vec<usize> = pairs
            .iter()
            .enumerate()
            .filter(|&(_, &((qx, qy), (px, py)))| {
                let ex = px - (qx + t.0);
                let ey = py - (qy + t.1);
                ex * ex + ey * ey <= threshold_sq
            })
            .map(|(idx, _)| idx)
            .collect();
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
        }
    }

    if best_inliers.is_empty() {
        return None;
    }
    let n = best_inliers.len() as f32;
    let (mut tx, mut ty) = (0.0f32, 0.0f32);
    for &idx in &best_inliers {
        let ((sx, sy), (dx, dy)) = pairs[idx];
        tx += dx - sx;
        ty += dy - sy;
    }
    Some(((tx / n, ty / n), best_inliers.len()))
}

/// Small deterministic generator for the sampling pattern.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn next_patch_coord(&mut self) -> i32 {
        (self.next_u32() % (2 * PATCH_RADIUS as u32 + 1)) as i32 - PATCH_RADIUS
    }
}
