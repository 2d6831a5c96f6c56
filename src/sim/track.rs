//! Track validity oracle
//!
//! A track is a traversability grid over the world plus a precomputed list
//! of valid coordinates sampled on a coarse stride. The stride sampling is
//! an approximation: ground between samples can differ from its
//! neighbours, which is accepted for spawn/goal placement.

use glam::Vec2;
use rand::Rng;
use std::f32::consts::TAU;

use crate::error::{RaceError, Result};
use crate::settings::TrackTuning;

/// Immutable traversability map for one map selection
#[derive(Debug, Clone)]
pub struct Track {
    width: f32,
    height: f32,
    cell_size: f32,
    cols: usize,
    rows: usize,
    /// Row-major drivable flags
    cells: Vec<bool>,
    stride: f32,
    valid_positions: Vec<Vec2>,
}

impl Track {
    /// Build a track from a row-major drivable grid
    ///
    /// A grid shorter than `cols * rows` is padded with blocked cells.
    pub fn from_mask(
        width: f32,
        height: f32,
        cell_size: f32,
        mut cells: Vec<bool>,
        stride: f32,
    ) -> Self {
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        cells.resize(cols * rows, false);

        let mut track = Self {
            width,
            height,
            cell_size,
            cols,
            rows,
            cells,
            stride,
            valid_positions: Vec::new(),
        };
        track.valid_positions = track.scan_valid_positions();
        track
    }

    /// Parse a text map, one character per cell
    ///
    /// `.`, `=` and `#` are drivable; anything else is blocked. Ragged
    /// rows are padded as blocked.
    pub fn from_ascii(map: &str, cell_size: f32, stride: f32) -> Result<Self> {
        let lines: Vec<&str> = map.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return Err(RaceError::InvalidLayout("map has no rows".to_string()));
        }
        let cols = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let rows = lines.len();

        let mut cells = vec![false; cols * rows];
        for (y, line) in lines.iter().enumerate() {
            for (x, ch) in line.chars().enumerate() {
                cells[y * cols + x] = matches!(ch, '.' | '=' | '#');
            }
        }

        Ok(Self::from_mask(
            cols as f32 * cell_size,
            rows as f32 * cell_size,
            cell_size,
            cells,
            stride,
        ))
    }

    /// Generate and rasterize a closed circuit
    pub fn generate<R: Rng>(tuning: &TrackTuning, rng: &mut R) -> Self {
        let layout = TrackLayout::generate(tuning, rng);
        let cells = layout.rasterize(tuning.width, tuning.height, tuning.cell_size);
        Self::from_mask(
            tuning.width,
            tuning.height,
            tuning.cell_size,
            cells,
            tuning.grid_stride,
        )
    }

    /// Fail race initialization when there is nowhere to place racers
    pub fn ensure_playable(&self) -> Result<()> {
        if self.valid_positions.is_empty() {
            return Err(RaceError::EmptyTrack {
                width: self.width,
                height: self.height,
                stride: self.stride,
            });
        }
        Ok(())
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Fallback coordinate when no valid position exists
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Precomputed valid coordinates in scan order
    pub fn valid_positions(&self) -> &[Vec2] {
        &self.valid_positions
    }

    /// Is this coordinate part of the drivable surface?
    pub fn is_traversable(&self, p: Vec2) -> bool {
        if !p.is_finite() || p.x < 0.0 || p.y < 0.0 || p.x >= self.width || p.y >= self.height {
            return false;
        }
        let col = (p.x / self.cell_size) as usize;
        let row = (p.y / self.cell_size) as usize;
        if col >= self.cols || row >= self.rows {
            return false;
        }
        self.cells[row * self.cols + col]
    }

    /// Uniformly pick a precomputed valid coordinate
    pub fn sample_random_valid_position<R: Rng>(&self, rng: &mut R) -> Vec2 {
        if self.valid_positions.is_empty() {
            log::warn!("No valid positions on track, falling back to center");
            return self.center();
        }
        let idx = rng.random_range(0..self.valid_positions.len());
        self.valid_positions[idx]
    }

    /// Valid coordinate farthest from `from` (first encountered wins ties)
    pub fn sample_farthest_position(&self, from: Vec2) -> Vec2 {
        let mut best: Option<(Vec2, f32)> = None;
        for &p in &self.valid_positions {
            let d = p.distance_squared(from);
            match best {
                Some((_, best_d)) if d <= best_d => {}
                _ => best = Some((p, d)),
            }
        }
        match best {
            Some((p, _)) => p,
            None => {
                log::warn!("No valid positions on track, falling back to center");
                self.center()
            }
        }
    }

    /// Valid coordinate closest to `to` (first encountered wins ties)
    pub fn nearest_valid_position(&self, to: Vec2) -> Vec2 {
        self.valid_positions
            .iter()
            .copied()
            .fold(None, |best: Option<(Vec2, f32)>, p| {
                let d = p.distance_squared(to);
                match best {
                    Some((_, best_d)) if d >= best_d => best,
                    _ => Some((p, d)),
                }
            })
            .map(|(p, _)| p)
            .unwrap_or_else(|| self.center())
    }

    fn scan_valid_positions(&self) -> Vec<Vec2> {
        if self.stride <= 0.0 {
            return Vec::new();
        }
        let steps_x = (self.width / self.stride).ceil() as usize;
        let steps_y = (self.height / self.stride).ceil() as usize;
        let mut valid = Vec::new();
        for iy in 0..steps_y {
            for ix in 0..steps_x {
                let p = Vec2::new(ix as f32 * self.stride, iy as f32 * self.stride);
                if self.is_traversable(p) {
                    valid.push(p);
                }
            }
        }
        valid
    }
}

/// Generated circuit: a closed centreline and a road width
#[derive(Debug, Clone)]
pub struct TrackLayout {
    pub centerline: Vec<Vec2>,
    pub road_width: f32,
}

impl TrackLayout {
    /// Jittered ellipse of control points around the world centre
    pub fn generate<R: Rng>(tuning: &TrackTuning, rng: &mut R) -> Self {
        let center = Vec2::new(tuning.width / 2.0, tuning.height / 2.0);
        let margin = tuning.road_width;
        let rx = (tuning.width / 2.0 - margin).max(tuning.road_width);
        let ry = (tuning.height / 2.0 - margin).max(tuning.road_width);

        let n = tuning.control_points.max(3);
        let centerline = (0..n)
            .map(|i| {
                let theta = i as f32 / n as f32 * TAU;
                let jitter = 1.0 - tuning.radius_jitter * rng.random::<f32>();
                center + Vec2::new(theta.cos() * rx, theta.sin() * ry) * jitter
            })
            .collect();

        Self {
            centerline,
            road_width: tuning.road_width,
        }
    }

    /// Mark every cell whose centre lies within half the road width of the centreline
    pub fn rasterize(&self, width: f32, height: f32, cell_size: f32) -> Vec<bool> {
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        let half = self.road_width / 2.0;
        let n = self.centerline.len();

        let mut cells = vec![false; cols * rows];
        if n < 2 {
            return cells;
        }
        for row in 0..rows {
            for col in 0..cols {
                let p = Vec2::new(
                    (col as f32 + 0.5) * cell_size,
                    (row as f32 + 0.5) * cell_size,
                );
                cells[row * cols + col] = (0..n).any(|i| {
                    let a = self.centerline[i];
                    let b = self.centerline[(i + 1) % n];
                    sd_segment(p, a, b) <= half
                });
            }
        }
        cells
    }
}

/// Distance from `p` to the segment `a`-`b`
#[inline]
pub fn sd_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    const RING: &str = "\
..........
.xxxxxxxx.
.x......x.
.xxxxxxxx.
..........";

    fn generated(seed: u64) -> Track {
        let mut rng = Pcg32::seed_from_u64(seed);
        Track::generate(&TrackTuning::default(), &mut rng)
    }

    #[test]
    fn test_ascii_traversability() {
        let track = Track::from_ascii(RING, 10.0, 10.0).unwrap();
        assert!(track.is_traversable(Vec2::new(5.0, 5.0)));
        assert!(!track.is_traversable(Vec2::new(15.0, 15.0)));
        assert!(track.is_traversable(Vec2::new(25.0, 25.0)));
        // Out of bounds
        assert!(!track.is_traversable(Vec2::new(-1.0, 5.0)));
        assert!(!track.is_traversable(Vec2::new(100.0, 5.0)));
    }

    #[test]
    fn test_ragged_rows_padded_blocked() {
        let track = Track::from_ascii("....\n..", 10.0, 10.0).unwrap();
        assert!(track.is_traversable(Vec2::new(15.0, 15.0)));
        assert!(!track.is_traversable(Vec2::new(35.0, 15.0)));
    }

    #[test]
    fn test_empty_track_is_fatal_but_sampling_falls_back() {
        let track = Track::from_ascii("xxxx\nxxxx", 10.0, 10.0).unwrap();
        assert!(matches!(
            track.ensure_playable(),
            Err(RaceError::EmptyTrack { .. })
        ));
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(track.sample_random_valid_position(&mut rng), track.center());
        assert_eq!(track.sample_farthest_position(Vec2::ZERO), track.center());
    }

    #[test]
    fn test_farthest_ties_first_encountered() {
        // Symmetric corners at (0,0) and (20,0) are equidistant from (10,0)
        let track = Track::from_ascii("...", 10.0, 20.0).unwrap();
        let valid = track.valid_positions().to_vec();
        assert_eq!(valid, vec![Vec2::new(0.0, 0.0), Vec2::new(20.0, 0.0)]);
        assert_eq!(
            track.sample_farthest_position(Vec2::new(10.0, 0.0)),
            Vec2::new(0.0, 0.0)
        );
    }

    #[test]
    fn test_generated_track_is_playable_and_deterministic() {
        let a = generated(7);
        let b = generated(7);
        assert!(a.ensure_playable().is_ok());
        assert_eq!(a.valid_positions(), b.valid_positions());
        // Circuit, not a filled blob: the centre of the world is off-road
        assert!(!a.is_traversable(a.center()));
    }

    #[test]
    fn test_sd_segment() {
        let d = sd_segment(Vec2::new(5.0, 3.0), Vec2::ZERO, Vec2::new(10.0, 0.0));
        assert!((d - 3.0).abs() < 1e-5);
        let d = sd_segment(Vec2::new(-4.0, 0.0), Vec2::ZERO, Vec2::new(10.0, 0.0));
        assert!((d - 4.0).abs() < 1e-5);
    }

    proptest! {
        // Generating a track rasterizes the full grid, keep the case count small
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_random_samples_are_traversable(seed in any::<u64>()) {
            let track = generated(seed % 16);
            let mut rng = Pcg32::seed_from_u64(seed);
            for _ in 0..32 {
                let p = track.sample_random_valid_position(&mut rng);
                prop_assert!(track.is_traversable(p));
            }
        }

        #[test]
        fn prop_farthest_dominates(seed in 0u64..16, x in 0.0f32..1280.0, y in 0.0f32..720.0) {
            let track = generated(seed);
            let from = Vec2::new(x, y);
            let far = track.sample_farthest_position(from);
            let far_d = far.distance(from);
            for p in track.valid_positions() {
                prop_assert!(far_d >= p.distance(from));
            }
        }
    }
}
