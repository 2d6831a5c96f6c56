//! Deterministic race simulation
//!
//! All race logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only
//! - Stable iteration order (by racer ID)
//! - No networking or platform dependencies

pub mod arbiter;
pub mod betting;
pub mod events;
pub mod gating;
pub mod movement;
pub mod powerup;
pub mod racer;
pub mod session;
pub mod stuck;
pub mod timer;
pub mod track;

pub use arbiter::{GoalToken, WinArbiter, within_goal};
pub use betting::{Bet, BetLedger, BetOutcome, BetSettlement};
pub use events::{EndReason, RaceEvent, RaceOutcome};
pub use gating::{MoveOutcome, advance, search_heading};
pub use powerup::{PowerUp, PowerUpKind};
pub use racer::{Racer, RacerId, RacerKind, RacerView, StatusEffects};
pub use session::{RacePhase, RaceSession, RosterEntry};
pub use stuck::{Recovery, StuckRecoveryEscalator, StuckTracker};
pub use timer::{PhaseTimer, TimerToken};
pub use track::Track;
