//! Cancellable phase timers
//!
//! A phase deadline is an explicit scheduled event carrying a token. At
//! most one is armed at a time; arming a new one cancels the old, and a
//! cancelled or already-fired token never fires.

use serde::{Deserialize, Serialize};

use super::session::RacePhase;

/// Identifies one scheduled transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerToken(u64);

/// A transition due at `deadline` (absolute tick), armed during `phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub token: TimerToken,
    pub phase: RacePhase,
    pub deadline: u64,
}

/// Single-slot timer
#[derive(Debug, Clone, Default)]
pub struct PhaseTimer {
    active: Option<ScheduledTransition>,
    issued: u64,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `phase`, replacing whatever was armed
    pub fn schedule(&mut self, phase: RacePhase, deadline: u64) -> TimerToken {
        self.issued += 1;
        let token = TimerToken(self.issued);
        if let Some(old) = self.active.replace(ScheduledTransition {
            token,
            phase,
            deadline,
        }) {
            log::debug!("Timer {:?} for {:?} replaced before firing", old.token, old.phase);
        }
        token
    }

    /// Cancel `token` if it has not fired yet
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.active {
            Some(t) if t.token == token => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever is armed
    pub fn cancel_active(&mut self) -> Option<TimerToken> {
        self.active.take().map(|t| t.token)
    }

    pub fn is_armed(&self, token: TimerToken) -> bool {
        self.active.is_some_and(|t| t.token == token)
    }

    pub fn deadline(&self) -> Option<u64> {
        self.active.map(|t| t.deadline)
    }

    pub fn active(&self) -> Option<ScheduledTransition> {
        self.active
    }

    /// Fire the armed timer if `now` has reached its deadline (fires once)
    pub fn poll(&mut self, now: u64) -> Option<ScheduledTransition> {
        match self.active {
            Some(t) if now >= t.deadline => self.active.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_at_deadline() {
        let mut timer = PhaseTimer::new();
        let token = timer.schedule(RacePhase::Betting, 5);
        assert!(timer.poll(4).is_none());
        let fired = timer.poll(5).unwrap();
        assert_eq!(fired.token, token);
        assert!(timer.poll(6).is_none());
    }

    #[test]
    fn test_cancelled_never_fires() {
        let mut timer = PhaseTimer::new();
        let token = timer.schedule(RacePhase::Racing, 10);
        assert!(timer.cancel(token));
        assert!(!timer.cancel(token));
        assert!(timer.poll(100).is_none());
    }

    #[test]
    fn test_rescheduling_invalidates_old_token() {
        let mut timer = PhaseTimer::new();
        let old = timer.schedule(RacePhase::Racing, 10);
        let new = timer.schedule(RacePhase::Results, 20);
        assert!(!timer.is_armed(old));
        assert!(!timer.cancel(old));
        assert!(timer.poll(15).is_none());
        assert_eq!(timer.poll(20).map(|t| t.token), Some(new));
    }
}
