//! Power-up pickups and their status effects

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::racer::{Racer, RacerId};
use super::track::Track;
use crate::settings::{PhaseTiming, PowerUpTuning};

/// Power-up types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpKind {
    /// Temporary speed multiplier
    Boost,
    /// Immunity to paralysis
    Shield,
    /// Mutual attraction with other magnetized racers
    Magnet,
    /// Paralyzes every other unshielded racer
    Lightning,
}

impl PowerUpKind {
    const ALL: [PowerUpKind; 4] = [
        PowerUpKind::Boost,
        PowerUpKind::Shield,
        PowerUpKind::Magnet,
        PowerUpKind::Lightning,
    ];
}

/// A pickup lying on the track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUp {
    pub id: u32,
    pub kind: PowerUpKind,
    pub pos: Vec2,
}

/// Place `count` pickups on oracle-sampled ground
pub fn spawn_power_ups<R: Rng>(track: &Track, count: usize, rng: &mut R) -> Vec<PowerUp> {
    (0..count)
        .map(|i| PowerUp {
            id: i as u32 + 1,
            kind: PowerUpKind::ALL[rng.random_range(0..PowerUpKind::ALL.len())],
            pos: track.sample_random_valid_position(rng),
        })
        .collect()
}

/// Index of the first pickup within reach of `pos`
pub fn find_pickup(power_ups: &[PowerUp], pos: Vec2, radius: f32) -> Option<usize> {
    let r_sq = radius * radius;
    power_ups
        .iter()
        .position(|p| p.pos.distance_squared(pos) <= r_sq)
}

/// Apply a collected pickup; returns the racers that ended up paralyzed
pub fn apply_power_up(
    kind: PowerUpKind,
    collector: RacerId,
    racers: &mut [Racer],
    tuning: &PowerUpTuning,
    timing: &PhaseTiming,
) -> Vec<RacerId> {
    let ticks = |secs: f32| timing.ticks(secs) as u32;
    let mut paralyzed = Vec::new();

    match kind {
        PowerUpKind::Boost => {
            if let Some(r) = racers.iter_mut().find(|r| r.id == collector) {
                r.grant_boost(tuning.boost_multiplier, ticks(tuning.boost_secs));
            }
        }
        PowerUpKind::Shield => {
            if let Some(r) = racers.iter_mut().find(|r| r.id == collector) {
                r.status.shield_ticks = r.status.shield_ticks.max(ticks(tuning.shield_secs));
            }
        }
        PowerUpKind::Magnet => {
            if let Some(r) = racers.iter_mut().find(|r| r.id == collector) {
                r.status.magnet_ticks = r.status.magnet_ticks.max(ticks(tuning.magnet_secs));
            }
        }
        PowerUpKind::Lightning => {
            for r in racers.iter_mut().filter(|r| r.id != collector) {
                if r.paralyze(ticks(tuning.paralyze_secs)) {
                    paralyzed.push(r.id);
                }
            }
        }
    }
    paralyzed
}
