//! Movement gating and directional search
//!
//! Before a racer moves, a short lookahead along its heading is probed
//! against the track. A blocked racer stays put this tick and picks the
//! heading with the most clear road out of 16 evenly spaced candidates,
//! reversing only when every candidate is boxed in. The search runs again
//! on every blocked tick so it tracks nearby obstacles as they change.

use glam::Vec2;
use std::f32::consts::{PI, TAU};

use super::racer::Racer;
use super::track::Track;
use crate::consts::SEARCH_DIRECTIONS;
use crate::settings::MovementTuning;
use crate::{heading_vector, normalize_heading};

/// What happened to a racer this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    Moved { from: Vec2, to: Vec2 },
    /// Blocked; heading changed to the clearest candidate
    Redirected { heading: f32 },
    /// Blocked everywhere; heading reversed
    Reversed { heading: f32 },
    /// Zero speed
    Stationary,
}

/// Is every probe along `heading` up to `distance` traversable?
pub fn path_is_clear(track: &Track, from: Vec2, heading: f32, distance: f32, step: f32) -> bool {
    let dir = heading_vector(heading);
    let steps = (distance / step).ceil().max(1.0) as usize;
    (1..=steps).all(|i| {
        let d = (i as f32 * step).min(distance);
        track.is_traversable(from + dir * d)
    })
}

/// How far one can go along `heading` before hitting blocked ground
///
/// Capped at `limit`; probes every `step` units.
pub fn clear_distance(track: &Track, from: Vec2, heading: f32, limit: f32, step: f32) -> f32 {
    let dir = heading_vector(heading);
    let mut clear = 0.0;
    let mut d = step;
    while d <= limit {
        if !track.is_traversable(from + dir * d) {
            break;
        }
        clear = d;
        d += step;
    }
    clear
}

/// Pick the candidate heading with the greatest clear distance
///
/// Candidates start at `current` and step by 22.5°. Ties keep the first
/// candidate evaluated. Returns the heading and whether it is a reversal.
pub fn search_heading(
    track: &Track,
    from: Vec2,
    current: f32,
    tuning: &MovementTuning,
) -> (f32, bool) {
    let spacing = TAU / SEARCH_DIRECTIONS as f32;
    let mut best_heading = current;
    let mut best_clear = -1.0f32;

    for i in 0..SEARCH_DIRECTIONS {
        let heading = normalize_heading(current + spacing * i as f32);
        let clear = clear_distance(
            track,
            from,
            heading,
            tuning.search_lookahead,
            tuning.probe_step,
        );
        if clear > best_clear {
            best_clear = clear;
            best_heading = heading;
        }
    }

    if best_clear < tuning.search_min_clear {
        (normalize_heading(current + PI), true)
    } else {
        (best_heading, false)
    }
}

/// Try to move `racer` one tick at `speed`
pub fn advance(
    racer: &mut Racer,
    track: &Track,
    speed: f32,
    dt: f32,
    tuning: &MovementTuning,
) -> MoveOutcome {
    let distance = speed * dt;
    if distance <= 0.0 {
        racer.velocity = Vec2::ZERO;
        return MoveOutcome::Stationary;
    }

    let lookahead = distance.max(tuning.probe_min_distance);
    if path_is_clear(track, racer.pos, racer.heading, lookahead, tuning.probe_step) {
        let from = racer.pos;
        let dir = racer.direction();
        racer.pos = from + dir * distance;
        racer.velocity = dir * speed;
        return MoveOutcome::Moved { from, to: racer.pos };
    }

    racer.velocity = Vec2::ZERO;
    let (heading, reversed) = search_heading(track, racer.pos, racer.heading, tuning);
    racer.heading = heading;
    if reversed {
        MoveOutcome::Reversed { heading }
    } else {
        MoveOutcome::Redirected { heading }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading_difference;
    use crate::sim::racer::RacerKind;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    /// 20x10 cells of 10 units, wall on column 12
    fn walled() -> Track {
        let row = format!("{}x{}", ".".repeat(12), ".".repeat(7));
        Track::from_ascii(&vec![row; 10].join("\n"), 10.0, 10.0).unwrap()
    }

    fn racer_at(pos: Vec2, heading: f32) -> Racer {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut r = Racer::new(1, "Probe", RacerKind::Player, 10, &MovementTuning::default(), &mut rng);
        r.reset(pos, heading);
        r
    }

    #[test]
    fn test_clear_path_moves() {
        let track = walled();
        let mut r = racer_at(Vec2::new(20.0, 50.0), 0.0);
        let outcome = advance(&mut r, &track, 60.0, 1.0 / 60.0, &MovementTuning::default());
        assert!(matches!(outcome, MoveOutcome::Moved { .. }));
        assert!((r.pos.x - 21.0).abs() < 1e-4);
        assert!((r.velocity.x - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_wall_blocks_and_redirects() {
        let track = walled();
        // 5 units short of the wall at x=120, heading straight at it
        let mut r = racer_at(Vec2::new(115.0, 50.0), 0.0);
        let start = r.pos;
        let outcome = advance(&mut r, &track, 60.0, 1.0 / 60.0, &MovementTuning::default());
        assert!(matches!(outcome, MoveOutcome::Redirected { .. }));
        assert_eq!(r.pos, start);
        assert_eq!(r.velocity, Vec2::ZERO);
        // The open side is west; the new heading must not point into the wall
        assert!(heading_difference(r.heading, 0.0) > std::f32::consts::FRAC_PI_2 - 1e-3);
    }

    #[test]
    fn test_boxed_in_reverses() {
        // Single open cell surrounded by walls
        let track = Track::from_ascii("xxx\nx.x\nxxx", 10.0, 10.0).unwrap();
        let mut r = racer_at(Vec2::new(15.0, 15.0), 0.5);
        let outcome = advance(&mut r, &track, 60.0, 1.0 / 60.0, &MovementTuning::default());
        match outcome {
            MoveOutcome::Reversed { heading } => {
                assert!((heading_difference(heading, 0.5) - PI).abs() < 1e-4);
            }
            other => panic!("expected reversal, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_distance_capped() {
        let row = ".".repeat(40);
        let track = Track::from_ascii(&vec![row; 5].join("\n"), 10.0, 10.0).unwrap();
        let d = clear_distance(&track, Vec2::new(5.0, 25.0), 0.0, 80.0, 4.0);
        assert!(d <= 80.0);
        assert!(d >= 76.0);
    }

    #[test]
    fn test_search_ties_keep_current_heading() {
        let row = ".".repeat(60);
        let track = Track::from_ascii(&vec![row; 60].join("\n"), 10.0, 10.0).unwrap();
        let (heading, reversed) =
            search_heading(&track, Vec2::new(300.0, 300.0), 1.0, &MovementTuning::default());
        assert!(!reversed);
        assert!((heading - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_speed_is_stationary() {
        let track = walled();
        let mut r = racer_at(Vec2::new(20.0, 50.0), 0.0);
        let outcome = advance(&mut r, &track, 0.0, 1.0 / 60.0, &MovementTuning::default());
        assert_eq!(outcome, MoveOutcome::Stationary);
    }
}
