//! Stuck detection and recovery escalation
//!
//! Detection watches net displacement over a bounded position history and
//! keeps a saturating counter. Escalation tries cheap fixes first and only
//! teleports when the racer stays stalled; the final tier always lands on
//! oracle-sampled ground, so no racer can remain stuck forever.

use std::collections::VecDeque;

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

use super::racer::Racer;
use super::track::Track;
use crate::consts::OFFSET_TELEPORT_ATTEMPTS;
use crate::heading_vector;
use crate::settings::{PhaseTiming, StuckTuning};

/// A timestamped position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub pos: Vec2,
    /// Seconds since race start (or client timestamp on the server)
    pub time: f32,
}

/// Result of one progress check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckCheck {
    pub stalled: bool,
    pub counter: u32,
}

/// Bounded position history plus the stuck counter
#[derive(Debug, Clone)]
pub struct StuckTracker {
    history: VecDeque<PositionSample>,
    capacity: usize,
    counter: u32,
}

impl StuckTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            counter: 0,
        }
    }

    /// Push a sample, evicting the oldest when full
    pub fn record(&mut self, pos: Vec2, time: f32) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(PositionSample { pos, time });
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    pub fn is_full(&self) -> bool {
        self.history.len() == self.capacity
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.history.back()
    }

    /// Distance between the oldest and newest sample
    pub fn net_displacement(&self) -> Option<f32> {
        match (self.history.front(), self.history.back()) {
            (Some(a), Some(b)) if self.history.len() >= 2 => Some(a.pos.distance(b.pos)),
            _ => None,
        }
    }

    /// Compare the window against `threshold`; `None` until the window is full
    pub fn check(&mut self, threshold: f32) -> Option<StuckCheck> {
        if !self.is_full() {
            return None;
        }
        let moved = self.net_displacement()?;
        let stalled = moved < threshold;
        if stalled {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }
        Some(StuckCheck {
            stalled,
            counter: self.counter,
        })
    }

    /// Forget the window but keep the counter
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.counter = 0;
    }
}

/// A corrective action taken for a stalled racer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recovery {
    /// Tier 1: fresh heading plus a short speed boost
    NewHeading { heading: f32 },
    /// Tier 2: short hop onto nearby drivable ground
    OffsetTeleport { from: Vec2, to: Vec2 },
    /// Tier 3: relocation to a freshly sampled valid position
    FullTeleport { from: Vec2, to: Vec2 },
}

impl Recovery {
    pub fn tier(&self) -> u8 {
        match self {
            Recovery::NewHeading { .. } => 1,
            Recovery::OffsetTeleport { .. } => 2,
            Recovery::FullTeleport { .. } => 3,
        }
    }
}

/// Samples racer progress on a fixed cadence and escalates recoveries
#[derive(Debug, Clone)]
pub struct StuckRecoveryEscalator {
    tuning: StuckTuning,
    sample_every: u64,
    check_every: u64,
    boost_ticks: u32,
}

impl StuckRecoveryEscalator {
    pub fn new(tuning: &StuckTuning, timing: &PhaseTiming) -> Self {
        Self {
            tuning: tuning.clone(),
            sample_every: timing.ticks(tuning.sample_interval_secs),
            check_every: timing.ticks(tuning.check_interval_secs),
            boost_ticks: timing.ticks(tuning.tier1_boost_secs) as u32,
        }
    }

    /// Sample and check one racer for race tick `race_tick` (time `t` seconds)
    ///
    /// Paralyzed racers are stalled on purpose and are left alone.
    pub fn observe<R: Rng>(
        &self,
        racer: &mut Racer,
        race_tick: u64,
        t: f32,
        track: &Track,
        rng: &mut R,
    ) -> Option<Recovery> {
        if racer.status.paralyzed() {
            return None;
        }
        if race_tick % self.sample_every == 0 {
            racer.stuck.record(racer.pos, t);
        }
        if race_tick == 0 || race_tick % self.check_every != 0 {
            return None;
        }

        let check = racer.stuck.check(self.tuning.progress_threshold)?;
        if !check.stalled {
            return None;
        }

        // Counter moves one step per check, so equality marks a fresh crossing
        let recovery = if check.counter >= self.tuning.tier3_at {
            Some(self.full_teleport(racer, track, rng))
        } else if check.counter == self.tuning.tier2_at {
            Some(self.offset_teleport(racer, track, rng))
        } else if check.counter == self.tuning.tier1_at {
            Some(self.new_heading(racer, rng))
        } else {
            None
        };

        if let Some(recovery) = &recovery {
            log::debug!(
                "Racer {} stuck (counter {}), tier {} recovery",
                racer.id,
                check.counter,
                recovery.tier()
            );
        }
        recovery
    }

    fn new_heading<R: Rng>(&self, racer: &mut Racer, rng: &mut R) -> Recovery {
        let heading = rng.random_range(0.0..TAU);
        racer.heading = heading;
        racer.grant_boost(self.tuning.tier1_boost_multiplier, self.boost_ticks);
        Recovery::NewHeading { heading }
    }

    fn offset_teleport<R: Rng>(&self, racer: &mut Racer, track: &Track, rng: &mut R) -> Recovery {
        let from = racer.pos;
        let to = (0..OFFSET_TELEPORT_ATTEMPTS)
            .map(|_| from + heading_vector(rng.random_range(0.0..TAU)) * self.tuning.tier2_offset)
            .find(|&p| track.is_traversable(p))
            .unwrap_or_else(|| track.nearest_valid_position(from));

        racer.pos = to;
        racer.heading = rng.random_range(0.0..TAU);
        // The hop itself must not read as progress on the next check
        racer.stuck.clear_history();
        Recovery::OffsetTeleport { from, to }
    }

    fn full_teleport<R: Rng>(&self, racer: &mut Racer, track: &Track, rng: &mut R) -> Recovery {
        let from = racer.pos;
        let to = track.sample_random_valid_position(rng);
        racer.pos = to;
        racer.heading = rng.random_range(0.0..TAU);
        racer.stuck.reset();
        Recovery::FullTeleport { from, to }
    }
}
