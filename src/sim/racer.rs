//! Racer simulation state
//!
//! Plain data owned by the simulation core. Renderers read [`RacerView`]
//! snapshots and never touch the simulation types directly.

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::stuck::StuckTracker;
use crate::settings::MovementTuning;
use crate::{heading_vector, normalize_heading};

/// Racer identifier, shared with server player ids
pub type RacerId = u32;

/// Who the racer stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RacerKind {
    /// Backed by a connected player (human-analog, no goal bias)
    Player,
    /// Filler racer (AI-analog, small goal bias)
    Bot,
}

/// Per-racer periodic performance wave, fixed at spawn
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biorhythm {
    pub phase: f32,
    /// Angular rate (radians/s)
    pub rate: f32,
}

impl Biorhythm {
    pub fn random<R: Rng>(rng: &mut R, tuning: &MovementTuning) -> Self {
        let rate = if tuning.biorhythm_rate_max > tuning.biorhythm_rate_min {
            rng.random_range(tuning.biorhythm_rate_min..tuning.biorhythm_rate_max)
        } else {
            tuning.biorhythm_rate_min
        };
        Self {
            phase: rng.random_range(0.0..std::f32::consts::TAU),
            rate,
        }
    }

    /// Speed factor at race time `t` (1.0 ± amplitude)
    #[inline]
    pub fn factor(&self, t: f32, amplitude: f32) -> f32 {
        1.0 + amplitude * (t * self.rate + self.phase).sin()
    }
}

/// Timed status flags, each a countdown in ticks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusEffects {
    pub paralyzed_ticks: u32,
    pub shield_ticks: u32,
    pub magnet_ticks: u32,
    pub boost_ticks: u32,
}

impl StatusEffects {
    pub fn paralyzed(&self) -> bool {
        self.paralyzed_ticks > 0
    }

    pub fn shielded(&self) -> bool {
        self.shield_ticks > 0
    }

    pub fn magnetized(&self) -> bool {
        self.magnet_ticks > 0
    }

    pub fn boosted(&self) -> bool {
        self.boost_ticks > 0
    }

    /// Advance all countdowns by one tick; returns true when a boost just ended
    pub fn tick_down(&mut self) -> bool {
        let was_boosted = self.boosted();
        self.paralyzed_ticks = self.paralyzed_ticks.saturating_sub(1);
        self.shield_ticks = self.shield_ticks.saturating_sub(1);
        self.magnet_ticks = self.magnet_ticks.saturating_sub(1);
        self.boost_ticks = self.boost_ticks.saturating_sub(1);
        was_boosted && !self.boosted()
    }
}

/// A racer entity
#[derive(Debug, Clone)]
pub struct Racer {
    pub id: RacerId,
    pub name: String,
    pub kind: RacerKind,
    pub pos: Vec2,
    /// Heading in radians, always in [0, 2π)
    pub heading: f32,
    /// Base speed (units/s)
    pub base_speed: f32,
    /// Power-up / recovery multiplier, 1.0 when nothing is active
    pub speed_multiplier: f32,
    pub biorhythm: Biorhythm,
    pub status: StatusEffects,
    /// Velocity applied on the last tick
    pub velocity: Vec2,
    /// Recent positions and the stuck counter
    pub stuck: StuckTracker,
}

impl Racer {
    pub fn new<R: Rng>(
        id: RacerId,
        name: impl Into<String>,
        kind: RacerKind,
        history_len: usize,
        tuning: &MovementTuning,
        rng: &mut R,
    ) -> Self {
        let base_speed = if tuning.max_speed > tuning.min_speed {
            rng.random_range(tuning.min_speed..tuning.max_speed)
        } else {
            tuning.min_speed
        };
        Self {
            id,
            name: name.into(),
            kind,
            pos: Vec2::ZERO,
            heading: 0.0,
            base_speed,
            speed_multiplier: 1.0,
            biorhythm: Biorhythm::random(rng, tuning),
            status: StatusEffects::default(),
            velocity: Vec2::ZERO,
            stuck: StuckTracker::new(history_len),
        }
    }

    /// Place the racer for a new race; biorhythm and base speed persist
    pub fn reset(&mut self, start: Vec2, heading: f32) {
        self.pos = start;
        self.heading = normalize_heading(heading);
        self.speed_multiplier = 1.0;
        self.status = StatusEffects::default();
        self.velocity = Vec2::ZERO;
        self.stuck.reset();
    }

    /// Grant a temporary speed multiplier
    pub fn grant_boost(&mut self, multiplier: f32, ticks: u32) {
        self.speed_multiplier = self.speed_multiplier.max(multiplier);
        self.status.boost_ticks = self.status.boost_ticks.max(ticks);
    }

    /// Paralyze unless shielded; returns whether it took effect
    pub fn paralyze(&mut self, ticks: u32) -> bool {
        if self.status.shielded() {
            return false;
        }
        self.status.paralyzed_ticks = self.status.paralyzed_ticks.max(ticks);
        self.velocity = Vec2::ZERO;
        true
    }

    /// Advance status countdowns, dropping an expired boost
    pub fn tick_status(&mut self) {
        if self.status.tick_down() {
            self.speed_multiplier = 1.0;
        }
    }

    pub fn direction(&self) -> Vec2 {
        heading_vector(self.heading)
    }

    pub fn view(&self) -> RacerView {
        RacerView {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            position: self.pos,
            heading: self.heading,
            velocity: self.velocity,
            paralyzed: self.status.paralyzed(),
            shielded: self.status.shielded(),
            magnetized: self.status.magnetized(),
            boosted: self.status.boosted(),
            stuck_counter: self.stuck.counter(),
        }
    }
}

/// Read-only racer snapshot for rendering adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RacerView {
    pub id: RacerId,
    pub name: String,
    pub kind: RacerKind,
    pub position: Vec2,
    pub heading: f32,
    pub velocity: Vec2,
    pub paralyzed: bool,
    pub shielded: bool,
    pub magnetized: bool,
    pub boosted: bool,
    pub stuck_counter: u32,
}
