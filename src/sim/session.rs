//! Race session state machine
//!
//! Drives one room through Betting -> Racing -> Results -> Resetting ->
//! Betting on a fixed timestep. Phase deadlines are cancellable timers:
//! leaving a phase cancels its timer, so a race that ended on the goal can
//! never be ended again by a stale timeout.
//!
//! Within a racing tick every racer is moved (in id order) before the goal
//! is checked, so simultaneous arrivals are arbitrated together.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

use super::arbiter::{GoalToken, WinArbiter};
use super::betting::{Bet, BetLedger};
use super::events::{EndReason, RaceEvent, RaceOutcome};
use super::gating::advance;
use super::movement::{applied_speed, nudge_toward, steering_target, update_heading_and_speed};
use super::powerup::{PowerUp, apply_power_up, find_pickup, spawn_power_ups};
use super::racer::{Racer, RacerId, RacerKind, RacerView};
use super::stuck::StuckRecoveryEscalator;
use super::timer::{PhaseTimer, ScheduledTransition};
use super::track::Track;
use crate::error::{RaceError, Result};
use crate::settings::RaceSettings;
use crate::standings::{Standing, StandingInput, compute_standings};

/// Race lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    Betting,
    Racing,
    Results,
    Resetting,
}

impl RacePhase {
    /// The only legal successor
    pub fn next(self) -> RacePhase {
        match self {
            RacePhase::Betting => RacePhase::Racing,
            RacePhase::Racing => RacePhase::Results,
            RacePhase::Results => RacePhase::Resetting,
            RacePhase::Resetting => RacePhase::Betting,
        }
    }

    pub fn accepts_movement(self) -> bool {
        self == RacePhase::Racing
    }
}

/// One racer to seat in a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub kind: RacerKind,
}

impl RosterEntry {
    pub fn player(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RacerKind::Player,
        }
    }

    pub fn bot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RacerKind::Bot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSource {
    /// Generated from settings; eligible for map rotation
    Generated,
    /// Supplied by the caller; kept for the session's lifetime
    Fixed,
}

/// A local, deterministic race room
#[derive(Debug, Clone)]
pub struct RaceSession {
    room_id: String,
    settings: RaceSettings,
    rng: Pcg32,
    track: Track,
    track_source: TrackSource,
    phase: RacePhase,
    /// Absolute tick counter
    time_ticks: u64,
    /// Completed races so far
    race_index: u32,
    race_start_tick: u64,
    /// Sorted by id
    racers: Vec<Racer>,
    token: GoalToken,
    start_point: Vec2,
    power_ups: Vec<PowerUp>,
    timer: PhaseTimer,
    ledger: BetLedger,
    arbiter: WinArbiter,
    escalator: StuckRecoveryEscalator,
    last_outcome: Option<RaceOutcome>,
    events: Vec<RaceEvent>,
}

impl RaceSession {
    /// Create a session on a freshly generated track
    pub fn new(
        room_id: impl Into<String>,
        settings: RaceSettings,
        seed: u64,
        roster: &[RosterEntry],
    ) -> Result<Self> {
        settings.validate()?;
        let mut rng = Pcg32::seed_from_u64(seed);
        let track = Track::generate(&settings.track, &mut rng);
        Self::build(room_id.into(), settings, rng, track, TrackSource::Generated, roster)
    }

    /// Create a session on a caller-supplied track
    pub fn with_track(
        room_id: impl Into<String>,
        settings: RaceSettings,
        seed: u64,
        track: Track,
        roster: &[RosterEntry],
    ) -> Result<Self> {
        settings.validate()?;
        let rng = Pcg32::seed_from_u64(seed);
        Self::build(room_id.into(), settings, rng, track, TrackSource::Fixed, roster)
    }

    fn build(
        room_id: String,
        settings: RaceSettings,
        mut rng: Pcg32,
        track: Track,
        track_source: TrackSource,
        roster: &[RosterEntry],
    ) -> Result<Self> {
        track.ensure_playable()?;

        let racers = roster
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                Racer::new(
                    i as RacerId + 1,
                    entry.name.clone(),
                    entry.kind,
                    settings.stuck.history_len,
                    &settings.movement,
                    &mut rng,
                )
            })
            .collect();

        let center = track.center();
        let mut session = Self {
            arbiter: WinArbiter::new(settings.track.goal_radius),
            escalator: StuckRecoveryEscalator::new(&settings.stuck, &settings.timing),
            room_id,
            settings,
            rng,
            track,
            track_source,
            phase: RacePhase::Betting,
            time_ticks: 0,
            race_index: 0,
            race_start_tick: 0,
            racers,
            token: GoalToken::new(center),
            start_point: center,
            power_ups: Vec::new(),
            timer: PhaseTimer::new(),
            ledger: BetLedger::new(),
            last_outcome: None,
            events: Vec::new(),
        };

        session.prepare_race();
        session.ledger.open();
        let deadline = session.arm(session.settings.timing.betting_secs);
        session.announce_phase(Some(deadline));
        log::info!(
            "Room {} ready: {} racers, betting closes at tick {}",
            session.room_id,
            session.racers.len(),
            deadline
        );
        Ok(session)
    }

    // ---- accessors ----

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn time_ticks(&self) -> u64 {
        self.time_ticks
    }

    pub fn race_index(&self) -> u32 {
        self.race_index
    }

    pub fn settings(&self) -> &RaceSettings {
        &self.settings
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn racers(&self) -> &[Racer] {
        &self.racers
    }

    pub fn racer(&self, id: RacerId) -> Option<&Racer> {
        self.racers.iter().find(|r| r.id == id)
    }

    pub fn racer_mut(&mut self, id: RacerId) -> Option<&mut Racer> {
        self.racers.iter_mut().find(|r| r.id == id)
    }

    pub fn racer_ids(&self) -> Vec<RacerId> {
        self.racers.iter().map(|r| r.id).collect()
    }

    pub fn views(&self) -> Vec<RacerView> {
        self.racers.iter().map(Racer::view).collect()
    }

    pub fn token(&self) -> &GoalToken {
        &self.token
    }

    pub fn start_point(&self) -> Vec2 {
        self.start_point
    }

    pub fn power_ups(&self) -> &[PowerUp] {
        &self.power_ups
    }

    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    pub fn last_outcome(&self) -> Option<&RaceOutcome> {
        self.last_outcome.as_ref()
    }

    /// Absolute tick at which the current phase times out, if armed
    pub fn deadline(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// Take every event emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<RaceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Live ranking by distance to the token (the final ranking once a race ends)
    pub fn standings(&self) -> Vec<Standing> {
        if self.phase != RacePhase::Racing {
            if let Some(outcome) = &self.last_outcome {
                return outcome.standings.clone();
            }
        }
        self.rank(None)
    }

    // ---- operations ----

    /// Advance one fixed timestep
    pub fn tick(&mut self) {
        self.time_ticks += 1;

        if let Some(fired) = self.timer.poll(self.time_ticks) {
            self.on_timer(fired);
        }

        if self.phase == RacePhase::Racing {
            self.step_race();
        }
    }

    /// Close betting early and start racing; false outside Betting
    pub fn start_race(&mut self) -> bool {
        if self.phase != RacePhase::Betting {
            log::debug!("Room {}: start ignored during {:?}", self.room_id, self.phase);
            return false;
        }
        self.begin_racing();
        true
    }

    /// End the current race
    ///
    /// Returns the outcome the first time; any later call for the same race
    /// (a second goal contact, a stale timeout, a late server verdict) is a
    /// no-op returning `None`.
    pub fn end_race(&mut self, reason: EndReason, winner: Option<RacerId>) -> Option<RaceOutcome> {
        if self.phase != RacePhase::Racing {
            log::debug!(
                "Room {}: end_race({:?}) ignored during {:?}",
                self.room_id,
                reason,
                self.phase
            );
            return None;
        }

        let winner = winner.filter(|w| self.racers.iter().any(|r| r.id == *w));
        if reason == EndReason::TokenReached {
            self.token.collect();
        }
        for racer in &mut self.racers {
            racer.velocity = Vec2::ZERO;
        }

        let outcome = RaceOutcome {
            room_id: self.room_id.clone(),
            winner_id: winner,
            end_reason: reason,
            standings: self.rank(winner),
        };
        let settlements = self.ledger.settle(winner);

        self.enter(RacePhase::Results, Some(self.settings.timing.results_secs));
        self.events.push(RaceEvent::for_outcome(outcome.clone()));
        for settlement in settlements {
            self.events.push(RaceEvent::BetResolved {
                room_id: self.room_id.clone(),
                settlement,
            });
        }

        match winner {
            Some(id) => log::info!(
                "Room {} race {}: racer {} wins ({:?})",
                self.room_id,
                self.race_index,
                id,
                reason
            ),
            None => log::info!(
                "Room {} race {}: no winner ({:?})",
                self.room_id,
                self.race_index,
                reason
            ),
        }

        self.last_outcome = Some(outcome.clone());
        Some(outcome)
    }

    /// Place a wager on a racer in this session
    pub fn place_bet(&mut self, bettor_id: &str, racer: RacerId, stake: u64) -> Result<Bet> {
        if self.phase != RacePhase::Betting {
            return Err(RaceError::BettingClosed);
        }
        let roster = self.racer_ids();
        self.ledger.place(
            bettor_id,
            racer,
            stake,
            &roster,
            self.time_ticks,
            &self.settings.betting,
        )
    }

    /// Replace the local start point and token with an authoritative layout
    pub fn adopt_layout(&mut self, start: Vec2, token: Vec2) -> Result<()> {
        if self.phase != RacePhase::Betting {
            return Err(RaceError::WrongPhase(self.phase));
        }
        if !self.track.is_traversable(start) {
            return Err(RaceError::InvalidLayout(format!(
                "start point ({:.1}, {:.1}) is off the track",
                start.x, start.y
            )));
        }

        self.start_point = start;
        self.token = GoalToken::new(token);
        for racer in &mut self.racers {
            let heading = racer.heading;
            racer.reset(start, heading);
        }
        self.events.push(RaceEvent::TokenSpawned {
            room_id: self.room_id.clone(),
            position: token,
            start,
        });
        Ok(())
    }

    // ---- phase plumbing ----

    fn arm(&mut self, secs: f32) -> u64 {
        let deadline = self.time_ticks + self.settings.timing.ticks(secs);
        self.timer.schedule(self.phase, deadline);
        deadline
    }

    fn announce_phase(&mut self, deadline: Option<u64>) {
        self.events.push(RaceEvent::PhaseChanged {
            room_id: self.room_id.clone(),
            phase: self.phase,
            deadline,
        });
    }

    /// Move to `to`, cancelling the current timer and arming a new one
    fn enter(&mut self, to: RacePhase, duration_secs: Option<f32>) -> Option<u64> {
        if self.phase.next() != to {
            log::warn!(
                "Room {}: refusing transition {:?} -> {:?}",
                self.room_id,
                self.phase,
                to
            );
            return None;
        }

        self.timer.cancel_active();
        self.phase = to;
        let deadline = duration_secs.map(|secs| self.arm(secs));
        self.announce_phase(deadline);
        log::debug!(
            "Room {} -> {:?} at tick {} (deadline {:?})",
            self.room_id,
            to,
            self.time_ticks,
            deadline
        );
        deadline
    }

    fn on_timer(&mut self, fired: ScheduledTransition) {
        if fired.phase != self.phase {
            log::debug!(
                "Room {}: stale {:?} timer ignored during {:?}",
                self.room_id,
                fired.phase,
                self.phase
            );
            return;
        }
        match self.phase {
            RacePhase::Betting => self.begin_racing(),
            RacePhase::Racing => {
                self.end_race(EndReason::Timeout, None);
            }
            RacePhase::Results => self.reset_cycle(),
            RacePhase::Resetting => {}
        }
    }

    fn begin_racing(&mut self) {
        self.ledger.close();
        self.race_start_tick = self.time_ticks;
        let deadline = self.enter(RacePhase::Racing, Some(self.settings.timing.race_secs));
        self.events.push(RaceEvent::RaceStarted {
            room_id: self.room_id.clone(),
            phase: RacePhase::Racing,
            deadline,
        });
        log::info!(
            "Room {} race {} started with {} bets",
            self.room_id,
            self.race_index,
            self.ledger.bets().len()
        );
    }

    fn reset_cycle(&mut self) {
        self.enter(RacePhase::Resetting, None);
        self.race_index += 1;
        self.rotate_map();
        self.prepare_race();
        self.ledger.open();
        self.enter(RacePhase::Betting, Some(self.settings.timing.betting_secs));
    }

    fn rotate_map(&mut self) {
        let every = self.settings.track.map_rotation_races;
        if self.track_source != TrackSource::Generated || every == 0 || self.race_index % every != 0
        {
            return;
        }
        let track = Track::generate(&self.settings.track, &mut self.rng);
        match track.ensure_playable() {
            Ok(()) => {
                log::info!("Room {}: rotated to a new track", self.room_id);
                self.track = track;
            }
            Err(e) => log::warn!("Room {}: keeping current track, {}", self.room_id, e),
        }
    }

    /// Choose start, token and pickups and line the racers up
    fn prepare_race(&mut self) {
        self.start_point = self.track.sample_random_valid_position(&mut self.rng);
        self.token = GoalToken::new(self.track.sample_farthest_position(self.start_point));
        self.power_ups = spawn_power_ups(
            &self.track,
            self.settings.power_ups.count,
            &mut self.rng,
        );
        for racer in &mut self.racers {
            let heading = self.rng.random_range(0.0..TAU);
            racer.reset(self.start_point, heading);
        }
        self.events.push(RaceEvent::TokenSpawned {
            room_id: self.room_id.clone(),
            position: self.token.pos,
            start: self.start_point,
        });
    }

    fn rank(&self, winner: Option<RacerId>) -> Vec<Standing> {
        let race_time = self
            .settings
            .timing
            .secs(self.time_ticks.saturating_sub(self.race_start_tick));
        compute_standings(self.racers.iter().map(|r| StandingInput {
            player_id: r.id,
            finish_time: (Some(r.id) == winner).then_some(race_time),
            distance_to_token: r.pos.distance(self.token.pos),
        }))
    }

    // ---- racing ----

    fn step_race(&mut self) {
        let race_tick = self.time_ticks - self.race_start_tick;
        let t = self.settings.timing.secs(race_tick);
        let dt = self.settings.timing.dt();
        let magnets: Vec<(RacerId, Vec2)> = self
            .racers
            .iter()
            .filter(|r| r.status.magnetized())
            .map(|r| (r.id, r.pos))
            .collect();

        let Self {
            room_id,
            settings,
            rng,
            track,
            racers,
            token,
            power_ups,
            escalator,
            events,
            ..
        } = self;

        for racer in racers.iter_mut() {
            racer.tick_status();
            if racer.status.paralyzed() {
                racer.velocity = Vec2::ZERO;
            } else {
                update_heading_and_speed(racer, &settings.movement, rng);
                if let Some((target, weight)) =
                    steering_target(racer, token.pos, power_ups, &magnets, &settings.movement)
                {
                    nudge_toward(racer, target, weight);
                }
                let speed = applied_speed(racer, t, &settings.movement);
                advance(racer, track, speed, dt, &settings.movement);
            }

            if let Some(recovery) = escalator.observe(racer, race_tick, t, track, rng) {
                events.push(RaceEvent::RacerRecovered {
                    room_id: room_id.clone(),
                    racer_id: racer.id,
                    recovery,
                });
            }
        }

        for i in 0..racers.len() {
            let (id, pos) = (racers[i].id, racers[i].pos);
            let Some(idx) = find_pickup(power_ups, pos, settings.power_ups.pickup_radius) else {
                continue;
            };
            let pickup = power_ups.remove(idx);
            let struck = apply_power_up(
                pickup.kind,
                id,
                racers.as_mut_slice(),
                &settings.power_ups,
                &settings.timing,
            );
            if !struck.is_empty() {
                log::debug!("Room {}: racer {} paralyzed {:?}", room_id, id, struck);
            }
            events.push(RaceEvent::PowerUpCollected {
                room_id: room_id.clone(),
                racer_id: id,
                kind: pickup.kind,
            });
        }

        if let Some(winner) = self.arbiter.resolve(&self.racers, &self.token) {
            self.end_race(EndReason::TokenReached, Some(winner));
        }
    }
}
