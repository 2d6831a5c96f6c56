//! Race lifecycle events
//!
//! Produced by sessions and rooms, consumed by UI and networking layers.
//! The wire form is tagged by `type` with camelCase fields.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::betting::BetSettlement;
use super::powerup::PowerUpKind;
use super::racer::RacerId;
use super::session::RacePhase;
use super::stuck::Recovery;
use crate::standings::Standing;

/// Why a race ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TokenReached,
    Timeout,
}

/// Final verdict of one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceOutcome {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub winner_id: Option<RacerId>,
    pub end_reason: EndReason,
    pub standings: Vec<Standing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RaceEvent {
    PhaseChanged {
        room_id: String,
        phase: RacePhase,
        /// Absolute tick (sessions) or room milliseconds (server)
        deadline: Option<u64>,
    },
    RaceStarted {
        room_id: String,
        phase: RacePhase,
        deadline: Option<u64>,
    },
    RaceWon(RaceOutcome),
    RaceFinished(RaceOutcome),
    TokenSpawned {
        room_id: String,
        position: Vec2,
        start: Vec2,
    },
    BetResolved {
        room_id: String,
        settlement: BetSettlement,
    },
    RacerRecovered {
        room_id: String,
        racer_id: RacerId,
        recovery: Recovery,
    },
    PowerUpCollected {
        room_id: String,
        racer_id: RacerId,
        kind: PowerUpKind,
    },
}

impl RaceEvent {
    /// Event announcing a finished race
    pub fn for_outcome(outcome: RaceOutcome) -> Self {
        match outcome.end_reason {
            EndReason::TokenReached => RaceEvent::RaceWon(outcome),
            EndReason::Timeout => RaceEvent::RaceFinished(outcome),
        }
    }

    pub fn outcome(&self) -> Option<&RaceOutcome> {
        match self {
            RaceEvent::RaceWon(o) | RaceEvent::RaceFinished(o) => Some(o),
            _ => None,
        }
    }
}
