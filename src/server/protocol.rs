//! Client/server wire messages
//!
//! JSON objects tagged by `type` (SCREAMING_SNAKE_CASE) with camelCase
//! fields. Race events share the same shape and are defined alongside the
//! simulation.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::room::RoomSnapshot;
use crate::sim::RacerId;
use crate::sim::betting::Bet;
use crate::sim::events::RaceEvent;

/// A client's report of where its racer is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub room_id: String,
    pub player_id: RacerId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Heading in radians
    pub direction: f32,
    /// Client clock, milliseconds; must increase
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    PlayerPositionUpdate(PositionUpdate),
    PlaceBet {
        room_id: String,
        bettor_id: String,
        target_player_id: RacerId,
        amount: u64,
    },
    JoinRoom {
        room_id: String,
        player_id: RacerId,
        name: String,
    },
    LeaveRoom {
        room_id: String,
        player_id: RacerId,
    },
    RequestSnapshot {
        room_id: String,
    },
}

impl ClientMessage {
    pub fn room_id(&self) -> &str {
        match self {
            ClientMessage::PlayerPositionUpdate(u) => &u.room_id,
            ClientMessage::PlaceBet { room_id, .. }
            | ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::LeaveRoom { room_id, .. }
            | ClientMessage::RequestSnapshot { room_id } => room_id,
        }
    }
}

/// Anything the server sends to a client
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Snapshot(RoomSnapshot),
    BetAccepted { room_id: String, bet: Bet },
    /// Race events carry their own `type`
    #[serde(untagged)]
    Event(RaceEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RacePhase;

    #[test]
    fn test_position_update_wire_shape() {
        let json = r#"{
            "type": "PLAYER_POSITION_UPDATE",
            "roomId": "arena",
            "playerId": 3,
            "position": [120.0, 40.5],
            "velocity": [1.0, 0.0],
            "direction": 1.5,
            "timestamp": 1200
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match &msg {
            ClientMessage::PlayerPositionUpdate(u) => {
                assert_eq!(u.player_id, 3);
                assert_eq!(u.position, Vec2::new(120.0, 40.5));
                assert_eq!(u.timestamp, 1200);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(msg.room_id(), "arena");
    }

    #[test]
    fn test_place_bet_fields() {
        let json = r#"{"type":"PLACE_BET","roomId":"arena","bettorId":"ann","targetPlayerId":2,"amount":50}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlaceBet {
                room_id: "arena".to_string(),
                bettor_id: "ann".to_string(),
                target_player_id: 2,
                amount: 50,
            }
        );
    }

    #[test]
    fn test_event_keeps_its_own_tag() {
        let msg = ServerMessage::Event(RaceEvent::PhaseChanged {
            room_id: "arena".to_string(),
            phase: RacePhase::Results,
            deadline: None,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PHASE_CHANGED");
        assert_eq!(json["phase"], "results");
    }
}
