//! Blind Derby - autonomous multiplayer race engine
//!
//! Core modules:
//! - `sim`: Deterministic race simulation (track, movement, stuck recovery, arbitration, phases)
//! - `server`: Authoritative per-room state store and phase timers
//! - `settings`: Data-driven race tuning
//! - `standings`: Final standings ordering shared by sessions and rooms
//! - `error`: Crate error type

pub mod error;
pub mod server;
pub mod settings;
pub mod sim;
pub mod standings;

pub use error::{RaceError, Result};
pub use settings::RaceSettings;
pub use standings::{Standing, StandingInput, compute_standings};

use glam::Vec2;
use std::f32::consts::{PI, TAU};

/// Design constants that are not exposed as tuning
pub mod consts {
    /// Number of candidate headings evaluated by the directional search (22.5° apart)
    pub const SEARCH_DIRECTIONS: usize = 16;
    /// Attempts made to find traversable ground for a tier-2 offset teleport
    pub const OFFSET_TELEPORT_ATTEMPTS: usize = 8;
    /// Upper bound on any steering nudge toward a target
    pub const MAX_STEERING_WEIGHT: f32 = 0.2;
}

/// Normalize a heading to [0, 2π)
#[inline]
pub fn normalize_heading(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Unit vector for a heading
#[inline]
pub fn heading_vector(heading: f32) -> Vec2 {
    Vec2::new(heading.cos(), heading.sin())
}

/// Heading (in [0, 2π)) pointing from `from` toward `to`
#[inline]
pub fn bearing(from: Vec2, to: Vec2) -> f32 {
    let d = to - from;
    normalize_heading(d.y.atan2(d.x))
}

/// Interpolate between two headings along the shortest arc
///
/// `t = 0` keeps `from`, `t = 1` lands on `to`.
pub fn lerp_heading(from: f32, to: f32, t: f32) -> f32 {
    let mut delta = normalize_heading(to) - normalize_heading(from);
    if delta > PI {
        delta -= TAU;
    } else if delta < -PI {
        delta += TAU;
    }
    normalize_heading(from + delta * t)
}

/// Smallest absolute angle between two headings
#[inline]
pub fn heading_difference(a: f32, b: f32) -> f32 {
    let d = (normalize_heading(a) - normalize_heading(b)).abs();
    d.min(TAU - d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_heading_range() {
        assert!((normalize_heading(-0.5) - (TAU - 0.5)).abs() < 1e-5);
        assert!((normalize_heading(TAU + 1.0) - 1.0).abs() < 1e-5);
        assert_eq!(normalize_heading(0.0), 0.0);
        assert!(normalize_heading(-1e-9) < TAU);
    }

    #[test]
    fn test_bearing_cardinal() {
        let b = bearing(Vec2::ZERO, Vec2::new(0.0, 10.0));
        assert!((b - PI / 2.0).abs() < 1e-5);
        let b = bearing(Vec2::ZERO, Vec2::new(-10.0, 0.0));
        assert!((b - PI).abs() < 1e-5);
    }

    #[test]
    fn test_lerp_heading_takes_short_way() {
        // 350° -> 10° should pass through 0°, not 180°
        let from = 350f32.to_radians();
        let to = 10f32.to_radians();
        let mid = lerp_heading(from, to, 0.5);
        assert!(heading_difference(mid, 0.0) < 1e-4);
    }

    #[test]
    fn test_heading_difference_wraps() {
        assert!((heading_difference(0.1, TAU - 0.1) - 0.2).abs() < 1e-5);
    }
}
