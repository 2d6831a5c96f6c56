//! Error type shared by the simulation, betting and room layers

use thiserror::Error;

use crate::sim::{RacePhase, RacerId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaceError {
    #[error("track has no traversable positions ({width}x{height} scanned at stride {stride})")]
    EmptyTrack { width: f32, height: f32, stride: f32 },

    #[error("invalid track layout: {0}")]
    InvalidLayout(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to read settings from {path}: {message}")]
    SettingsIo { path: String, message: String },

    #[error("betting is closed")]
    BettingClosed,

    #[error("unknown racer: {0}")]
    UnknownRacer(RacerId),

    #[error("stake must be greater than zero")]
    ZeroStake,

    #[error("stake {stake} exceeds the limit of {max}")]
    StakeTooLarge { stake: u64, max: u64 },

    #[error("bettor {0} already has a bet on this race")]
    DuplicateBet(String),

    #[error("unknown room: {0}")]
    UnknownRoom(String),

    #[error("room already exists: {0}")]
    RoomExists(String),

    #[error("unknown player {player} in room {room}")]
    UnknownPlayer { room: String, player: RacerId },

    #[error("room {room} is not accepting updates during {phase:?}")]
    NotAcceptingUpdates { room: String, phase: RacePhase },

    #[error("rejected update from player {player}: {reason}")]
    RejectedUpdate { player: RacerId, reason: String },

    #[error("operation not valid during {0:?}")]
    WrongPhase(RacePhase),
}

pub type Result<T> = std::result::Result<T, RaceError>;
