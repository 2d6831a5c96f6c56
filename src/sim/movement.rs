//! Blind-horse movement model
//!
//! Racers do not seek the goal. Each tick the heading may jump by a bounded
//! random amount and the base speed may drift; the speed actually applied
//! is modulated by the racer's biorhythm. Bots (and magnetized racers) get
//! a small weighted nudge toward a target, never a steering override.
//!
//! Nothing here moves the racer: see `gating` for that.

use glam::Vec2;
use rand::Rng;
use std::f32::consts::TAU;

use super::powerup::PowerUp;
use super::racer::{Racer, RacerId, RacerKind};
use crate::consts::MAX_STEERING_WEIGHT;
use crate::settings::MovementTuning;
use crate::{bearing, lerp_heading, normalize_heading};

/// Perturb heading and base speed for one tick
pub fn update_heading_and_speed<R: Rng>(racer: &mut Racer, tuning: &MovementTuning, rng: &mut R) {
    let turn_chance = match racer.kind {
        RacerKind::Player => tuning.player_turn_chance,
        RacerKind::Bot => tuning.bot_turn_chance,
    };
    if rng.random_bool(turn_chance.clamp(0.0, 1.0)) {
        let max_delta = tuning.max_turn_fraction * TAU;
        let delta = rng.random_range(-max_delta..=max_delta);
        racer.heading = normalize_heading(racer.heading + delta);
    }

    if rng.random_bool(tuning.speed_drift_chance.clamp(0.0, 1.0)) {
        let step = tuning.speed_drift_step;
        let drift = rng.random_range(-step..=step);
        racer.base_speed = (racer.base_speed + drift).clamp(tuning.min_speed, tuning.max_speed);
    }
}

/// Speed applied this tick at race time `t` (units/s)
pub fn applied_speed(racer: &Racer, t: f32, tuning: &MovementTuning) -> f32 {
    if racer.status.paralyzed() {
        return 0.0;
    }
    racer.base_speed
        * racer.speed_multiplier
        * racer.biorhythm.factor(t, tuning.biorhythm_amplitude)
}

/// Nudge the heading toward `target` by at most the steering cap
pub fn nudge_toward(racer: &mut Racer, target: Vec2, weight: f32) {
    if target.distance_squared(racer.pos) <= f32::EPSILON {
        return;
    }
    let weight = weight.clamp(0.0, MAX_STEERING_WEIGHT);
    racer.heading = lerp_heading(racer.heading, bearing(racer.pos, target), weight);
}

/// What, if anything, pulls on this racer's heading
///
/// Magnetized racers are drawn to the nearest other magnetized racer. Bots
/// otherwise lean toward the nearest remaining power-up, then the goal.
pub fn steering_target(
    racer: &Racer,
    goal: Vec2,
    power_ups: &[PowerUp],
    magnets: &[(RacerId, Vec2)],
    tuning: &MovementTuning,
) -> Option<(Vec2, f32)> {
    if racer.status.magnetized() {
        let partner = magnets
            .iter()
            .filter(|(id, _)| *id != racer.id)
            .map(|(_, p)| *p)
            .min_by(|a, b| {
                a.distance_squared(racer.pos)
                    .total_cmp(&b.distance_squared(racer.pos))
            });
        if let Some(p) = partner {
            return Some((p, tuning.magnet_bias));
        }
    }

    if racer.kind != RacerKind::Bot {
        return None;
    }
    let nearest_pickup = power_ups
        .iter()
        .map(|p| p.pos)
        .min_by(|a, b| {
            a.distance_squared(racer.pos)
                .total_cmp(&b.distance_squared(racer.pos))
        });
    Some((nearest_pickup.unwrap_or(goal), tuning.bot_goal_bias))
}
