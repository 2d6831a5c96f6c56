//! Async room registry
//!
//! Rooms are independent: each sits behind its own mutex and owns its
//! phase timer task and event channel. Arming a timer aborts the previous
//! task; a task that already woke is fenced off by the room epoch.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use rand::SeedableRng;
use rand_pcg::Pcg32;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::protocol::{ClientMessage, PositionUpdate, ServerMessage};
use super::room::{RoomSnapshot, RoomState};
use crate::error::{RaceError, Result};
use crate::settings::RaceSettings;
use crate::sim::betting::Bet;
use crate::sim::events::{RaceEvent, RaceOutcome};
use crate::sim::track::Track;
use crate::sim::{RacePhase, RacerId};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An armed phase timer and the epoch it was armed in
struct ArmedTimer {
    epoch: u64,
    task: JoinHandle<()>,
}

/// One live room
pub struct RoomHandle {
    room_id: String,
    state: Mutex<RoomState>,
    timer: std::sync::Mutex<Option<ArmedTimer>>,
    events: broadcast::Sender<RaceEvent>,
    opened_at: Instant,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Milliseconds since the room opened
    pub fn now_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaceEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> RacePhase {
        self.state.lock().await.phase()
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn join(self: &Arc<Self>, player_id: RacerId, name: &str) -> RoomSnapshot {
        let mut state = self.state.lock().await;
        state.join(player_id, name);
        self.publish(&mut state);
        state.snapshot()
    }

    pub async fn leave(&self, player_id: RacerId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.leave(player_id)
    }

    pub async fn place_bet(&self, bettor_id: &str, target: RacerId, amount: u64) -> Result<Bet> {
        let mut state = self.state.lock().await;
        state.place_bet(bettor_id, target, amount, self.now_ms())
    }

    /// Validate and apply a client report; broadcasts the result if it ended the race
    pub async fn apply_position_update(
        self: &Arc<Self>,
        update: &PositionUpdate,
    ) -> Result<Option<RaceOutcome>> {
        let mut state = self.state.lock().await;
        let outcome = state.apply_position_update(update, self.now_ms())?;
        if outcome.is_some() {
            self.publish(&mut state);
        }
        Ok(outcome)
    }

    /// Skip the rest of the betting countdown
    pub async fn start_race_now(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        let started = state.begin_racing(self.now_ms());
        if started {
            self.publish(&mut state);
        }
        started
    }

    async fn fire_deadline(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.on_deadline(epoch, self.now_ms()) {
            self.publish(&mut state);
        }
    }

    /// Broadcast pending events and re-arm the timer if the epoch moved
    fn publish(self: &Arc<Self>, state: &mut RoomState) {
        for event in state.drain_events() {
            // No subscribers is not an error
            let _ = self.events.send(event);
        }
        self.arm_timer(state.epoch(), state.deadline());
    }

    fn arm_timer(self: &Arc<Self>, epoch: u64, deadline_ms: Option<u64>) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|t| t.epoch == epoch) {
            return;
        }
        if let Some(old) = slot.take() {
            old.task.abort();
        }
        let Some(deadline_ms) = deadline_ms else {
            return;
        };

        let room: Weak<Self> = Arc::downgrade(self);
        let at = self.opened_at + Duration::from_millis(deadline_ms);
        log::debug!(
            "Room {}: timer armed for epoch {} at {}ms",
            self.room_id,
            epoch,
            deadline_ms
        );
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(room) = room.upgrade() {
                room.fire_deadline(epoch).await;
            }
        });
        *slot = Some(ArmedTimer { epoch, task });
    }

    fn cancel_timer(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.task.abort();
        }
    }
}

/// All rooms on this server
#[derive(Clone)]
pub struct RoomRegistry {
    settings: RaceSettings,
    rooms: Arc<RwLock<HashMap<String, Arc<RoomHandle>>>>,
}

impl RoomRegistry {
    pub fn new(settings: RaceSettings) -> Self {
        Self {
            settings,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a room on `track`, or on a track generated from `seed`
    pub async fn create_room(
        &self,
        room_id: &str,
        seed: u64,
        track: Option<Track>,
    ) -> Result<Arc<RoomHandle>> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room_id) {
            return Err(RaceError::RoomExists(room_id.to_string()));
        }

        let track = match track {
            Some(track) => track,
            None => {
                let mut rng = Pcg32::seed_from_u64(seed);
                Track::generate(&self.settings.track, &mut rng)
            }
        };
        let state = RoomState::new(room_id, self.settings.clone(), seed, track, 0)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = Arc::new(RoomHandle {
            room_id: room_id.to_string(),
            state: Mutex::new(state),
            timer: std::sync::Mutex::new(None),
            events,
            opened_at: Instant::now(),
        });

        {
            let mut state = handle.state.lock().await;
            handle.publish(&mut state);
        }
        rooms.insert(room_id.to_string(), Arc::clone(&handle));
        log::info!("Registry: room {} created", room_id);
        Ok(handle)
    }

    /// Remove a room and stop its timer
    pub async fn close_room(&self, room_id: &str) -> Result<()> {
        let handle = self
            .rooms
            .write()
            .await
            .remove(room_id)
            .ok_or_else(|| RaceError::UnknownRoom(room_id.to_string()))?;
        handle.cancel_timer();
        log::info!("Registry: room {} closed", room_id);
        Ok(())
    }

    pub async fn room(&self, room_id: &str) -> Result<Arc<RoomHandle>> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| RaceError::UnknownRoom(room_id.to_string()))
    }

    pub async fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Dispatch one client message; the reply, if any, goes back to the sender
    pub async fn handle(&self, message: ClientMessage) -> Result<Option<ServerMessage>> {
        let room = match self.room(message.room_id()).await {
            Ok(room) => room,
            Err(e) => {
                log::warn!("Dropping message for unknown room {}", message.room_id());
                return Err(e);
            }
        };

        match message {
            ClientMessage::PlayerPositionUpdate(update) => {
                room.apply_position_update(&update).await?;
                Ok(None)
            }
            ClientMessage::PlaceBet {
                room_id,
                bettor_id,
                target_player_id,
                amount,
            } => {
                let bet = room.place_bet(&bettor_id, target_player_id, amount).await?;
                Ok(Some(ServerMessage::BetAccepted { room_id, bet }))
            }
            ClientMessage::JoinRoom {
                player_id, name, ..
            } => Ok(Some(ServerMessage::Snapshot(
                room.join(player_id, &name).await,
            ))),
            ClientMessage::LeaveRoom { player_id, .. } => {
                room.leave(player_id).await?;
                Ok(None)
            }
            ClientMessage::RequestSnapshot { .. } => {
                Ok(Some(ServerMessage::Snapshot(room.snapshot().await)))
            }
        }
    }
}
