//! Race tuning and server settings
//!
//! Loaded from JSON. Every section falls back to the design defaults, so a
//! partial file only needs the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::MAX_STEERING_WEIGHT;
use crate::error::{RaceError, Result};

/// Phase durations and simulation rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTiming {
    /// Fixed simulation ticks per second
    pub tick_rate: u32,
    /// Betting countdown
    pub betting_secs: f32,
    /// Race time limit before a timeout ending
    pub race_secs: f32,
    /// How long results stay up before the reset
    pub results_secs: f32,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            betting_secs: 15.0,
            race_secs: 300.0,
            results_secs: 8.0,
        }
    }
}

impl PhaseTiming {
    /// Fixed timestep in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Convert a duration in seconds to whole ticks (at least one)
    pub fn ticks(&self, secs: f32) -> u64 {
        ((secs * self.tick_rate as f32).round() as u64).max(1)
    }

    /// Convert a tick count to seconds
    pub fn secs(&self, ticks: u64) -> f32 {
        ticks as f32 / self.tick_rate as f32
    }
}

/// Blind-horse movement tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementTuning {
    /// Per-tick chance that a player-owned racer picks a new heading
    pub player_turn_chance: f64,
    /// Per-tick chance that a bot racer picks a new heading
    pub bot_turn_chance: f64,
    /// Largest heading change as a fraction of a full turn
    pub max_turn_fraction: f32,
    /// Per-tick chance of base speed drift
    pub speed_drift_chance: f64,
    /// Largest single base speed drift (units/s)
    pub speed_drift_step: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Biorhythm amplitude as a fraction of speed
    pub biorhythm_amplitude: f32,
    /// Biorhythm angular rate range (radians/s)
    pub biorhythm_rate_min: f32,
    pub biorhythm_rate_max: f32,
    /// Steering nudge toward the goal or a power-up (bots only)
    pub bot_goal_bias: f32,
    /// Steering nudge between magnetized racers
    pub magnet_bias: f32,
    /// Lookahead probe spacing
    pub probe_step: f32,
    /// Shortest lookahead probed before each move
    pub probe_min_distance: f32,
    /// Clear-distance cap for the directional search
    pub search_lookahead: f32,
    /// Below this clear distance on every heading the racer reverses
    pub search_min_clear: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            player_turn_chance: 0.02,
            bot_turn_chance: 0.015,
            max_turn_fraction: 0.3,
            speed_drift_chance: 0.01,
            speed_drift_step: 10.0,
            min_speed: 60.0,
            max_speed: 120.0,
            biorhythm_amplitude: 0.15,
            biorhythm_rate_min: 0.3,
            biorhythm_rate_max: 1.2,
            bot_goal_bias: 0.2,
            magnet_bias: 0.15,
            probe_step: 4.0,
            probe_min_distance: 12.0,
            search_lookahead: 80.0,
            search_min_clear: 8.0,
        }
    }
}

/// Stuck detection and recovery escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckTuning {
    /// Position samples kept per racer
    pub history_len: usize,
    pub sample_interval_secs: f32,
    pub check_interval_secs: f32,
    /// Net displacement over the window below which a check counts as stalled
    pub progress_threshold: f32,
    pub tier1_at: u32,
    pub tier2_at: u32,
    pub tier3_at: u32,
    /// Speed multiplier granted by a tier-1 recovery
    pub tier1_boost_multiplier: f32,
    pub tier1_boost_secs: f32,
    /// Tier-2 random offset distance
    pub tier2_offset: f32,
}

impl Default for StuckTuning {
    fn default() -> Self {
        Self {
            history_len: 10,
            sample_interval_secs: 0.1,
            check_interval_secs: 1.0,
            progress_threshold: 5.0,
            tier1_at: 3,
            tier2_at: 6,
            tier3_at: 10,
            tier1_boost_multiplier: 1.6,
            tier1_boost_secs: 1.5,
            tier2_offset: 40.0,
        }
    }
}

/// Track generation and placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackTuning {
    pub width: f32,
    pub height: f32,
    /// Traversability grid resolution
    pub cell_size: f32,
    /// Valid-position scan stride
    pub grid_stride: f32,
    pub road_width: f32,
    /// Control points around the generated circuit
    pub control_points: usize,
    /// Radial jitter of control points (fraction of the base radius)
    pub radius_jitter: f32,
    /// Goal collision radius
    pub goal_radius: f32,
    /// Regenerate the track every N races (0 = never)
    pub map_rotation_races: u32,
}

impl Default for TrackTuning {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            cell_size: 4.0,
            grid_stride: 20.0,
            road_width: 90.0,
            control_points: 12,
            radius_jitter: 0.18,
            goal_radius: 32.0,
            map_rotation_races: 3,
        }
    }
}

/// Power-up placement and effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerUpTuning {
    /// Power-ups placed per race
    pub count: usize,
    pub pickup_radius: f32,
    pub boost_multiplier: f32,
    pub boost_secs: f32,
    pub shield_secs: f32,
    pub magnet_secs: f32,
    pub paralyze_secs: f32,
}

impl Default for PowerUpTuning {
    fn default() -> Self {
        Self {
            count: 4,
            pickup_radius: 20.0,
            boost_multiplier: 1.5,
            boost_secs: 3.0,
            shield_secs: 5.0,
            magnet_secs: 5.0,
            paralyze_secs: 2.0,
        }
    }
}

/// Wager odds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingTuning {
    /// Fraction of the pool kept by the house
    pub house_edge: f32,
    /// Lowest odds ever offered
    pub min_odds: f32,
    /// Virtual stake seeded on every racer so early odds are sane
    pub seed_liquidity: u64,
    /// Largest single stake accepted
    pub max_stake: u64,
}

impl Default for BettingTuning {
    fn default() -> Self {
        Self {
            house_edge: 0.1,
            min_odds: 1.05,
            seed_liquidity: 100,
            max_stake: 1_000_000,
        }
    }
}

/// Server-side validation of client position reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatPolicy {
    /// Multiplier on the fastest legitimate speed before a jump is rejected
    pub speed_tolerance: f32,
    /// Reject positions the track says are not drivable
    pub reject_off_track: bool,
    /// Consecutive rejections after which the next on-track report resyncs
    pub resync_after_rejections: u32,
}

impl Default for AntiCheatPolicy {
    fn default() -> Self {
        Self {
            speed_tolerance: 1.5,
            reject_off_track: true,
            resync_after_rejections: 3,
        }
    }
}

/// Complete race configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSettings {
    pub timing: PhaseTiming,
    pub movement: MovementTuning,
    pub stuck: StuckTuning,
    pub track: TrackTuning,
    pub power_ups: PowerUpTuning,
    pub betting: BettingTuning,
    pub anti_cheat: AntiCheatPolicy,
}

impl RaceSettings {
    /// Parse and validate settings from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| RaceError::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| RaceError::SettingsIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded race settings from {}", path.display());
        Ok(settings)
    }

    /// Fastest speed any racer can legitimately reach (units/s)
    pub fn speed_envelope(&self) -> f32 {
        let boost = self
            .power_ups
            .boost_multiplier
            .max(self.stuck.tier1_boost_multiplier)
            .max(1.0);
        self.movement.max_speed * boost * (1.0 + self.movement.biorhythm_amplitude)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(RaceError::InvalidSettings(msg.to_string()));

        if self.timing.tick_rate == 0 {
            return fail("timing.tick_rate must be positive");
        }
        if self.timing.betting_secs <= 0.0
            || self.timing.race_secs <= 0.0
            || self.timing.results_secs <= 0.0
        {
            return fail("phase durations must be positive");
        }
        if self.movement.min_speed <= 0.0 || self.movement.min_speed > self.movement.max_speed {
            return fail("movement speed range is empty");
        }
        if self.movement.biorhythm_rate_min > self.movement.biorhythm_rate_max {
            return fail("biorhythm rate range is empty");
        }
        if !(0.0..1.0).contains(&self.movement.biorhythm_amplitude) {
            return fail("biorhythm amplitude must be in [0, 1)");
        }
        if self.movement.bot_goal_bias > MAX_STEERING_WEIGHT
            || self.movement.magnet_bias > MAX_STEERING_WEIGHT
        {
            return fail("steering bias may not exceed 0.2");
        }
        if self.movement.probe_step <= 0.0 {
            return fail("movement.probe_step must be positive");
        }
        if self.stuck.history_len < 2 {
            return fail("stuck.history_len must hold at least two samples");
        }
        if !(self.stuck.tier1_at < self.stuck.tier2_at && self.stuck.tier2_at < self.stuck.tier3_at)
            || self.stuck.tier1_at == 0
        {
            return fail("stuck tiers must be ascending and non-zero");
        }
        if self.track.grid_stride <= 0.0 || self.track.cell_size <= 0.0 {
            return fail("track grid resolution must be positive");
        }
        if self.track.width <= 0.0 || self.track.height <= 0.0 {
            return fail("track dimensions must be positive");
        }
        if self.track.control_points < 3 {
            return fail("track needs at least three control points");
        }
        if !(0.0..1.0).contains(&self.betting.house_edge) {
            return fail("betting.house_edge must be in [0, 1)");
        }
        if self.betting.max_stake == 0 {
            return fail("betting.max_stake must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RaceSettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            RaceSettings::from_json(r#"{ "timing": { "betting_secs": 5.0 } }"#).unwrap();
        assert_eq!(settings.timing.betting_secs, 5.0);
        assert_eq!(settings.timing.race_secs, 300.0);
        assert_eq!(settings.track.goal_radius, 32.0);
    }

    #[test]
    fn test_rejects_excess_bias() {
        let err = RaceSettings::from_json(r#"{ "movement": { "bot_goal_bias": 0.5 } }"#);
        assert!(matches!(err, Err(RaceError::InvalidSettings(_))));
    }

    #[test]
    fn test_rejects_unordered_tiers() {
        let mut settings = RaceSettings::default();
        settings.stuck.tier2_at = settings.stuck.tier3_at;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_tick_conversion() {
        let timing = PhaseTiming {
            tick_rate: 1,
            betting_secs: 5.0,
            ..Default::default()
        };
        assert_eq!(timing.ticks(timing.betting_secs), 5);
        assert_eq!(timing.secs(120), 120.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RaceSettings::load("/definitely/not/here.json");
        assert!(matches!(err, Err(RaceError::SettingsIo { .. })));
    }
}
