//! Authoritative per-room race state
//!
//! The room is the sole judge of a race: client position reports are
//! validated, mirrored and re-checked against the goal here, and only the
//! room can end a race. Time is passed in as milliseconds since the room
//! was created so the state itself stays synchronous and testable.
//!
//! Every phase transition bumps the room epoch. Deadline callbacks carry
//! the epoch they were armed in and are ignored once it has moved on.

use std::collections::BTreeMap;

use glam::Vec2;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::Serialize;

use crate::error::{RaceError, Result};
use crate::normalize_heading;
use crate::settings::RaceSettings;
use crate::sim::arbiter::{GoalToken, WinArbiter};
use crate::sim::betting::{Bet, BetLedger};
use crate::sim::events::{EndReason, RaceEvent, RaceOutcome};
use crate::sim::stuck::{StuckCheck, StuckTracker};
use crate::sim::track::Track;
use crate::sim::{RacePhase, RacerId};
use crate::standings::{Standing, StandingInput, compute_standings};

use super::protocol::PositionUpdate;

/// Canonical state of one player in a room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: RacerId,
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub direction: f32,
    /// Connected
    pub alive: bool,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_place: Option<u32>,
    pub stuck_counter: u32,
    #[serde(skip)]
    last_timestamp: Option<u64>,
    #[serde(skip)]
    last_update_ms: u64,
    #[serde(skip)]
    last_sample_ms: Option<u64>,
    #[serde(skip)]
    last_check_ms: u64,
    #[serde(skip)]
    rejections: u32,
    #[serde(skip)]
    stuck: StuckTracker,
}

impl PlayerState {
    fn new(player_id: RacerId, name: String, start: Vec2, history_len: usize) -> Self {
        Self {
            player_id,
            name,
            position: start,
            velocity: Vec2::ZERO,
            direction: 0.0,
            alive: true,
            finished: false,
            finish_time: None,
            finish_place: None,
            stuck_counter: 0,
            last_timestamp: None,
            last_update_ms: 0,
            last_sample_ms: None,
            last_check_ms: 0,
            rejections: 0,
            stuck: StuckTracker::new(history_len),
        }
    }

    /// Line up at `start` for a race beginning at `now_ms`
    fn reset(&mut self, start: Vec2, now_ms: u64) {
        self.position = start;
        self.velocity = Vec2::ZERO;
        self.finished = false;
        self.finish_time = None;
        self.finish_place = None;
        self.stuck_counter = 0;
        self.last_timestamp = None;
        self.last_update_ms = now_ms;
        self.last_sample_ms = None;
        self.last_check_ms = now_ms;
        self.rejections = 0;
        self.stuck.reset();
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Room-clock stuck bookkeeping against the canonical position
    fn observe_progress(&mut self, now_ms: u64, cadence: &StallCadence) -> Option<StuckCheck> {
        let t = now_ms.saturating_sub(cadence.race_started_ms) as f32 / 1000.0;
        if self
            .last_sample_ms
            .is_none_or(|last| now_ms >= last + cadence.sample_ms)
        {
            self.stuck.record(self.position, t);
            self.last_sample_ms = Some(now_ms);
        }
        if now_ms < self.last_check_ms + cadence.check_ms {
            return None;
        }
        self.last_check_ms = now_ms;
        let check = self.stuck.check(cadence.threshold)?;
        self.stuck_counter = check.counter;
        Some(check)
    }
}

/// Stuck sampling cadence in room milliseconds
struct StallCadence {
    sample_ms: u64,
    check_ms: u64,
    threshold: f32,
    race_started_ms: u64,
}

/// Everything a (re)connecting client needs to render the room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub phase: RacePhase,
    pub epoch: u64,
    pub deadline: Option<u64>,
    pub race_index: u32,
    pub start: Vec2,
    pub token: Vec2,
    pub token_collected: bool,
    pub players: Vec<PlayerState>,
    pub standings: Vec<Standing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RaceOutcome>,
}

/// Authoritative state for one room
#[derive(Debug)]
pub struct RoomState {
    room_id: String,
    settings: RaceSettings,
    track: Track,
    rng: Pcg32,
    arbiter: WinArbiter,
    phase: RacePhase,
    epoch: u64,
    /// Absolute room milliseconds
    deadline: Option<u64>,
    race_index: u32,
    race_started_ms: u64,
    start: Vec2,
    token: GoalToken,
    /// Keyed by id for stable iteration
    players: BTreeMap<RacerId, PlayerState>,
    ledger: BetLedger,
    outcome: Option<RaceOutcome>,
    events: Vec<RaceEvent>,
}

impl RoomState {
    /// Open a room in Betting at time `now_ms`
    pub fn new(
        room_id: impl Into<String>,
        settings: RaceSettings,
        seed: u64,
        track: Track,
        now_ms: u64,
    ) -> Result<Self> {
        settings.validate()?;
        track.ensure_playable()?;

        let center = track.center();
        let mut room = Self {
            room_id: room_id.into(),
            arbiter: WinArbiter::new(settings.track.goal_radius),
            settings,
            track,
            rng: Pcg32::seed_from_u64(seed),
            phase: RacePhase::Betting,
            epoch: 0,
            deadline: None,
            race_index: 0,
            race_started_ms: now_ms,
            start: center,
            token: GoalToken::new(center),
            players: BTreeMap::new(),
            ledger: BetLedger::new(),
            outcome: None,
            events: Vec::new(),
        };
        room.place_layout();
        room.ledger.open();
        room.deadline = Some(now_ms + room.phase_ms(room.settings.timing.betting_secs));
        room.announce_phase();
        log::info!("Room {} opened", room.room_id);
        Ok(room)
    }

    // ---- accessors ----

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
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

    pub fn start(&self) -> Vec2 {
        self.start
    }

    pub fn token(&self) -> &GoalToken {
        &self.token
    }

    pub fn player(&self, id: RacerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    pub fn last_outcome(&self) -> Option<&RaceOutcome> {
        self.outcome.as_ref()
    }

    pub fn drain_events(&mut self) -> Vec<RaceEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- membership ----

    /// Seat a player, or mark a returning one connected again
    pub fn join(&mut self, player_id: RacerId, name: impl Into<String>) {
        let start = self.start;
        let history_len = self.settings.stuck.history_len;
        let race_started_ms = self.race_started_ms;
        let player = self.players.entry(player_id).or_insert_with(|| {
            let mut p = PlayerState::new(player_id, name.into(), start, history_len);
            p.last_update_ms = race_started_ms;
            p.last_check_ms = race_started_ms;
            p
        });
        player.alive = true;
        log::info!("Room {}: player {} joined", self.room_id, player_id);
    }

    /// Mark a player disconnected; their race result still counts
    pub fn leave(&mut self, player_id: RacerId) -> Result<()> {
        let player = self
            .players
            .get_mut(&player_id)
            .ok_or_else(|| RaceError::UnknownPlayer {
                room: self.room_id.clone(),
                player: player_id,
            })?;
        player.alive = false;
        log::info!("Room {}: player {} left", self.room_id, player_id);
        Ok(())
    }

    // ---- betting ----

    pub fn place_bet(
        &mut self,
        bettor_id: &str,
        target: RacerId,
        amount: u64,
        now_ms: u64,
    ) -> Result<Bet> {
        if self.phase != RacePhase::Betting {
            return Err(RaceError::BettingClosed);
        }
        let roster: Vec<RacerId> = self.players.keys().copied().collect();
        self.ledger
            .place(bettor_id, target, amount, &roster, now_ms, &self.settings.betting)
    }

    // ---- phases ----

    /// Handle a phase deadline armed during `epoch`
    ///
    /// Returns false for a stale deadline; the room is left untouched.
    pub fn on_deadline(&mut self, epoch: u64, now_ms: u64) -> bool {
        if epoch != self.epoch {
            log::debug!(
                "Room {}: stale deadline for epoch {} (now {})",
                self.room_id,
                epoch,
                self.epoch
            );
            return false;
        }
        match self.phase {
            RacePhase::Betting => self.begin_racing(now_ms),
            RacePhase::Racing => self.end_race(EndReason::Timeout, None, now_ms).is_some(),
            RacePhase::Results => self.reset_for_next_race(now_ms),
            RacePhase::Resetting => false,
        }
    }

    /// Close betting and start the race
    pub fn begin_racing(&mut self, now_ms: u64) -> bool {
        if self.phase != RacePhase::Betting {
            return false;
        }
        self.ledger.close();
        self.race_started_ms = now_ms;
        for player in self.players.values_mut() {
            player.reset(self.start, now_ms);
        }
        self.transition(RacePhase::Racing, Some(self.settings.timing.race_secs), now_ms);
        self.events.push(RaceEvent::RaceStarted {
            room_id: self.room_id.clone(),
            phase: RacePhase::Racing,
            deadline: self.deadline,
        });
        log::info!(
            "Room {} race {} started ({} players, {} bets)",
            self.room_id,
            self.race_index,
            self.players.len(),
            self.ledger.bets().len()
        );
        true
    }

    /// Declare the race over; only the first call per race has an effect
    ///
    /// Winners come from the room's own goal check; callers outside the
    /// crate reach this only through `on_deadline`.
    pub(crate) fn end_race(
        &mut self,
        reason: EndReason,
        winner: Option<RacerId>,
        now_ms: u64,
    ) -> Option<RaceOutcome> {
        if self.phase != RacePhase::Racing {
            log::debug!("Room {}: end_race ignored during {:?}", self.room_id, self.phase);
            return None;
        }

        let winner = winner.filter(|id| self.players.contains_key(id));
        let race_time = now_ms.saturating_sub(self.race_started_ms) as f32 / 1000.0;
        if let Some(p) = winner.and_then(|id| self.players.get_mut(&id)) {
            p.finished = true;
            p.finish_time = Some(race_time);
            p.finish_place = Some(1);
        }
        if reason == EndReason::TokenReached {
            self.token.collect();
        }
        for player in self.players.values_mut() {
            player.velocity = Vec2::ZERO;
        }

        let outcome = RaceOutcome {
            room_id: self.room_id.clone(),
            winner_id: winner,
            end_reason: reason,
            standings: self.rank(),
        };
        let settlements = self.ledger.settle(winner);

        self.transition(RacePhase::Results, Some(self.settings.timing.results_secs), now_ms);
        self.events.push(RaceEvent::for_outcome(outcome.clone()));
        for settlement in settlements {
            self.events.push(RaceEvent::BetResolved {
                room_id: self.room_id.clone(),
                settlement,
            });
        }
        log::info!(
            "Room {} race {} over: {:?}, winner {:?}",
            self.room_id,
            self.race_index,
            reason,
            winner
        );

        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    /// Results -> Resetting -> Betting with a fresh layout
    pub fn reset_for_next_race(&mut self, now_ms: u64) -> bool {
        if self.phase != RacePhase::Results {
            return false;
        }
        self.transition(RacePhase::Resetting, None, now_ms);
        self.race_index += 1;
        self.place_layout();
        for player in self.players.values_mut() {
            player.reset(self.start, now_ms);
        }
        self.outcome = None;
        self.ledger.open();
        self.transition(RacePhase::Betting, Some(self.settings.timing.betting_secs), now_ms);
        true
    }

    fn phase_ms(&self, secs: f32) -> u64 {
        (secs * 1000.0).round().max(1.0) as u64
    }

    fn transition(&mut self, to: RacePhase, duration_secs: Option<f32>, now_ms: u64) {
        debug_assert_eq!(self.phase.next(), to);
        self.phase = to;
        self.epoch += 1;
        self.deadline = duration_secs.map(|secs| now_ms + self.phase_ms(secs));
        self.announce_phase();
    }

    fn announce_phase(&mut self) {
        self.events.push(RaceEvent::PhaseChanged {
            room_id: self.room_id.clone(),
            phase: self.phase,
            deadline: self.deadline,
        });
    }

    fn place_layout(&mut self) {
        self.start = self.track.sample_random_valid_position(&mut self.rng);
        self.token = GoalToken::new(self.track.sample_farthest_position(self.start));
        self.events.push(RaceEvent::TokenSpawned {
            room_id: self.room_id.clone(),
            position: self.token.pos,
            start: self.start,
        });
    }

    // ---- position reports ----

    /// Validate and mirror a client position report
    ///
    /// Returns the race outcome when this report decided the race.
    pub fn apply_position_update(
        &mut self,
        update: &PositionUpdate,
        now_ms: u64,
    ) -> Result<Option<RaceOutcome>> {
        if update.room_id != self.room_id {
            log::warn!(
                "Room {}: dropped update from player {} addressed to room {}",
                self.room_id,
                update.player_id,
                update.room_id
            );
            return Err(RaceError::UnknownRoom(update.room_id.clone()));
        }
        if self.phase != RacePhase::Racing {
            return Err(RaceError::NotAcceptingUpdates {
                room: self.room_id.clone(),
                phase: self.phase,
            });
        }

        let policy = &self.settings.anti_cheat;
        let envelope = self.settings.speed_envelope();
        let tick_ms = (1000 / self.settings.timing.tick_rate.max(1)) as u64;
        let stuck = &self.settings.stuck;
        let cadence = StallCadence {
            sample_ms: self.phase_ms(stuck.sample_interval_secs),
            check_ms: self.phase_ms(stuck.check_interval_secs),
            threshold: stuck.progress_threshold,
            race_started_ms: self.race_started_ms,
        };
        let token = self.token.pos;

        let Some(player) = self.players.get_mut(&update.player_id) else {
            log::warn!(
                "Room {}: dropped update from unknown player {}",
                self.room_id,
                update.player_id
            );
            return Err(RaceError::UnknownPlayer {
                room: self.room_id.clone(),
                player: update.player_id,
            });
        };

        let verdict = if !update.position.is_finite()
            || !update.velocity.is_finite()
            || !update.direction.is_finite()
        {
            Err("non-finite values")
        } else if player.last_timestamp.is_some_and(|last| update.timestamp <= last) {
            Err("stale timestamp")
        } else if policy.reject_off_track && !self.track.is_traversable(update.position) {
            Err("position off track")
        } else {
            let elapsed_ms = now_ms.saturating_sub(player.last_update_ms).max(tick_ms);
            let allowed = envelope * policy.speed_tolerance * elapsed_ms as f32 / 1000.0;
            let gains_ground = update.position.distance(token) < player.position.distance(token);
            if player.position.distance(update.position) <= allowed {
                Ok(false)
            } else if player.rejections < policy.resync_after_rejections {
                Err("moved faster than the speed envelope")
            } else if gains_ground && player.stuck_counter < stuck.tier2_at {
                // Recovery teleports only follow a stall the room has seen itself
                Err("jumped toward the token without a stall")
            } else {
                Ok(true)
            }
        };

        let resynced = match verdict {
            Ok(resynced) => resynced,
            Err(reason) => {
                player.rejections += 1;
                // The canonical position is frozen, so the room keeps timing the stall
                player.observe_progress(now_ms, &cadence);
                log::warn!(
                    "Room {}: rejected update from player {} ({}), {} in a row",
                    self.room_id,
                    update.player_id,
                    reason,
                    player.rejections
                );
                return Err(RaceError::RejectedUpdate {
                    player: update.player_id,
                    reason: reason.to_string(),
                });
            }
        };

        if resynced {
            log::info!(
                "Room {}: resyncing player {} after {} rejections",
                self.room_id,
                update.player_id,
                player.rejections
            );
            player.stuck.clear_history();
            player.last_sample_ms = None;
        }
        player.rejections = 0;
        player.position = update.position;
        player.velocity = update.velocity;
        player.direction = normalize_heading(update.direction);
        player.last_timestamp = Some(update.timestamp);
        player.last_update_ms = now_ms;

        if let Some(check) = player.observe_progress(now_ms, &cadence) {
            if check.stalled && check.counter == stuck.tier1_at {
                log::debug!(
                    "Room {}: player {} reported as stalled",
                    self.room_id,
                    update.player_id
                );
            }
        }

        // A resync is taken on trust and never decides the race
        if resynced {
            return Ok(None);
        }
        let position = player.position;
        let player_id = player.player_id;
        if self.arbiter.check_goal_at(position, &self.token) {
            return Ok(self.end_race(EndReason::TokenReached, Some(player_id), now_ms));
        }
        Ok(None)
    }

    // ---- views ----

    fn rank(&self) -> Vec<Standing> {
        compute_standings(self.players.values().map(|p| StandingInput {
            player_id: p.player_id,
            finish_time: p.finish_time,
            distance_to_token: p.position.distance(self.token.pos),
        }))
    }

    /// Current standings (final once the race has ended)
    pub fn standings(&self) -> Vec<Standing> {
        match &self.outcome {
            Some(outcome) => outcome.standings.clone(),
            None => self.rank(),
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            phase: self.phase,
            epoch: self.epoch,
            deadline: self.deadline,
            race_index: self.race_index,
            start: self.start,
            token: self.token.pos,
            token_collected: self.token.is_collected(),
            players: self.players.values().cloned().collect(),
            standings: self.standings(),
            outcome: self.outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_track() -> Track {
        let row = ".".repeat(64);
        Track::from_ascii(&vec![row; 36].join("\n"), 20.0, 20.0).unwrap()
    }

    fn room() -> RoomState {
        let mut room = RoomState::new("arena", RaceSettings::default(), 42, open_track(), 0).unwrap();
        room.join(1, "Ann");
        room.join(2, "Bob");
        room
    }

    fn update(player_id: RacerId, position: Vec2, timestamp: u64) -> PositionUpdate {
        PositionUpdate {
            room_id: "arena".to_string(),
            player_id,
            position,
            velocity: Vec2::ZERO,
            direction: 0.0,
            timestamp,
        }
    }

    /// A point `dist` units from `from`, staying inside the world
    fn step_from(from: Vec2, dist: f32) -> Vec2 {
        if from.x + dist < 1270.0 {
            from + Vec2::new(dist, 0.0)
        } else {
            from - Vec2::new(dist, 0.0)
        }
    }

    #[test]
    fn test_updates_only_while_racing() {
        let mut room = room();
        let start = room.start();
        let err = room.apply_position_update(&update(1, start, 1), 10).unwrap_err();
        assert!(matches!(err, RaceError::NotAcceptingUpdates { phase: RacePhase::Betting, .. }));

        assert!(room.begin_racing(100));
        assert!(room.apply_position_update(&update(1, start, 1), 116).is_ok());
    }

    #[test]
    fn test_unknown_player_is_an_error_not_a_panic() {
        let mut room = room();
        room.begin_racing(0);
        let err = room
            .apply_position_update(&update(9, room.start(), 1), 16)
            .unwrap_err();
        assert_eq!(
            err,
            RaceError::UnknownPlayer {
                room: "arena".to_string(),
                player: 9
            }
        );
    }

    /// Report the start position every 100ms until the room has counted a tier-2 stall
    fn hold_at_start(room: &mut RoomState, player_id: RacerId) -> (u64, u64) {
        let start = room.start();
        let mut now = 0;
        let mut ts = 0;
        while room.player(player_id).unwrap().stuck_counter < room.settings().stuck.tier2_at {
            now += 100;
            ts += 1;
            room.apply_position_update(&update(player_id, start, ts), now).unwrap();
            assert!(now < 20_000, "room never counted the stall");
        }
        (now, ts)
    }

    #[test]
    fn test_rejects_teleport_then_resyncs() {
        let mut room = room();
        room.begin_racing(0);
        let start = room.start();
        let far = step_from(start, 400.0);
        let (now, ts) = hold_at_start(&mut room, 1);

        for i in 1..=3 {
            let err = room.apply_position_update(&update(1, far, ts + i), now + i * 16);
            assert!(matches!(err, Err(RaceError::RejectedUpdate { .. })));
        }
        assert_eq!(room.player(1).unwrap().position, start);
        assert_eq!(room.player(1).unwrap().rejections(), 3);

        // Fourth consecutive report is taken as a resync
        room.apply_position_update(&update(1, far, ts + 4), now + 64).unwrap();
        assert_eq!(room.player(1).unwrap().position, far);
        assert_eq!(room.player(1).unwrap().rejections(), 0);
    }

    #[test]
    fn test_jump_onto_token_never_wins() {
        let mut room = room();
        room.begin_racing(0);
        let token = room.token().pos;

        for ts in 1..=8u64 {
            let err = room.apply_position_update(&update(1, token, ts), ts * 16);
            assert!(matches!(err, Err(RaceError::RejectedUpdate { .. })));
        }
        assert_eq!(room.player(1).unwrap().position, room.start());
        assert_eq!(room.phase(), RacePhase::Racing);
        assert!(room.last_outcome().is_none());
    }

    #[test]
    fn test_resync_onto_token_does_not_decide_the_race() {
        let mut room = room();
        room.begin_racing(0);
        let token = room.token().pos;
        let (now, ts) = hold_at_start(&mut room, 1);

        for i in 1..=3 {
            assert!(room.apply_position_update(&update(1, token, ts + i), now + i * 16).is_err());
        }
        let resync = room.apply_position_update(&update(1, token, ts + 4), now + 64);
        assert_eq!(resync, Ok(None));
        assert_eq!(room.player(1).unwrap().position, token);
        assert_eq!(room.phase(), RacePhase::Racing);
        assert!(room.drain_events().iter().all(|e| e.outcome().is_none()));
    }

    #[test]
    fn test_unknown_room_is_dropped() {
        let mut room = room();
        room.begin_racing(0);
        let mut stray = update(1, room.start(), 1);
        stray.room_id = "elsewhere".to_string();
        assert_eq!(
            room.apply_position_update(&stray, 16),
            Err(RaceError::UnknownRoom("elsewhere".to_string()))
        );
        assert_eq!(room.player(1).unwrap().rejections(), 0);
    }

    #[test]
    fn test_huge_stake_is_rejected() {
        let mut room = room();
        let max = room.settings().betting.max_stake;
        assert_eq!(
            room.place_bet("whale", 1, u64::MAX, 1),
            Err(RaceError::StakeTooLarge { stake: u64::MAX, max })
        );
        assert!(room.ledger().bets().is_empty());
        assert!(room.place_bet("whale", 1, max, 2).is_ok());
    }

    #[test]
    fn test_rejects_stale_and_non_finite() {
        let mut room = room();
        room.begin_racing(0);
        let start = room.start();
        room.apply_position_update(&update(1, start, 10), 16).unwrap();
        assert!(room.apply_position_update(&update(1, start, 10), 32).is_err());
        assert!(room.apply_position_update(&update(1, start, 9), 48).is_err());
        let nan = Vec2::new(f32::NAN, 0.0);
        assert!(room.apply_position_update(&update(1, nan, 11), 64).is_err());
    }

    #[test]
    fn test_rejects_off_track() {
        let mut room = room();
        room.begin_racing(0);
        let err = room.apply_position_update(&update(1, Vec2::new(-30.0, -30.0), 1), 16);
        assert!(matches!(err, Err(RaceError::RejectedUpdate { .. })));
    }

    #[test]
    fn test_server_decides_single_win() {
        let mut room = room();
        room.begin_racing(0);
        let token = room.token().pos;

        // Walk player 2 up to the token in legal steps
        let start = room.start();
        let dir = (token - start).normalize_or_zero();
        let total = start.distance(token);
        let mut now = 0;
        let mut outcome = None;
        for i in 1..10_000u64 {
            now += 16;
            let pos = start + dir * (2.0 * i as f32).min(total);
            outcome = room.apply_position_update(&update(2, pos, i), now).unwrap();
            if outcome.is_some() {
                break;
            }
        }
        let outcome = outcome.unwrap();
        assert_eq!(outcome.winner_id, Some(2));
        assert_eq!(outcome.end_reason, EndReason::TokenReached);
        assert_eq!(room.phase(), RacePhase::Results);
        assert_eq!(outcome.standings[0].player_id, 2);
        assert_eq!(room.player(2).unwrap().finish_place, Some(1));

        // Later reports and timeouts cannot produce a second result
        assert!(room.apply_position_update(&update(1, token, 1), now + 16).is_err());
        assert!(room.end_race(EndReason::Timeout, None, now + 32).is_none());
        let won = room
            .drain_events()
            .iter()
            .filter(|e| e.outcome().is_some())
            .count();
        assert_eq!(won, 1);
    }

    #[test]
    fn test_stale_epoch_deadline_is_ignored() {
        let mut room = room();
        let betting_epoch = room.epoch();
        assert!(room.begin_racing(500));
        assert!(!room.on_deadline(betting_epoch, 15_000));
        assert_eq!(room.phase(), RacePhase::Racing);

        let racing_epoch = room.epoch();
        room.end_race(EndReason::Timeout, None, 1_000);
        assert!(!room.on_deadline(racing_epoch, 300_500));
        assert_eq!(room.phase(), RacePhase::Results);
        assert!(room.on_deadline(room.epoch(), 9_000));
        assert_eq!(room.phase(), RacePhase::Betting);
        assert_eq!(room.race_index(), 1);
    }

    #[test]
    fn test_reset_clears_race_state() {
        let mut room = room();
        room.place_bet("carol", 1, 25, 5).unwrap();
        room.begin_racing(0);
        room.end_race(EndReason::TokenReached, Some(1), 4_000);
        room.reset_for_next_race(12_000);

        let start = room.start();
        assert_eq!(room.token().pos, room.track().sample_farthest_position(start));
        assert!(!room.token().is_collected());
        assert!(room.ledger().bets().is_empty());
        assert!(room.last_outcome().is_none());
        for p in room.players() {
            assert_eq!(p.position, start);
            assert!(!p.finished);
        }
    }

    #[test]
    fn test_snapshot_serializes_for_reconnect() {
        let mut room = room();
        room.begin_racing(0);
        room.leave(2).unwrap();
        let snapshot = room.snapshot();
        assert_eq!(snapshot.players.len(), 2);
        assert!(!snapshot.players[1].alive);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "racing");
        assert_eq!(json["players"][0]["playerId"], 1);
        assert!(json["players"][0].get("stuck").is_none());
        assert_eq!(json["standings"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_betting_only_in_betting() {
        let mut room = room();
        assert!(room.place_bet("carol", 2, 10, 1).is_ok());
        assert!(matches!(
            room.place_bet("dave", 7, 10, 1),
            Err(RaceError::UnknownRacer(7))
        ));
        room.begin_racing(10);
        assert_eq!(room.place_bet("erin", 1, 10, 11), Err(RaceError::BettingClosed));
    }
}
