//! Goal token and win arbitration
//!
//! The first racer to touch the token wins outright. When several racers
//! arrive on the same tick, the first magnetized one in iteration order is
//! declared winner (magnetized racers are pulled in together and one has to
//! be picked deterministically); without a magnetized arrival the first
//! arrival wins. The rule carries no fairness guarantee.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::racer::{Racer, RacerId};

/// The single collectible that ends the race
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalToken {
    pub pos: Vec2,
    collected: bool,
}

impl GoalToken {
    pub fn new(pos: Vec2) -> Self {
        Self {
            pos,
            collected: false,
        }
    }

    pub fn is_collected(&self) -> bool {
        self.collected
    }

    /// Mark collected; false if it already was
    pub fn collect(&mut self) -> bool {
        !std::mem::replace(&mut self.collected, true)
    }
}

/// Is `pos` within `radius` of the token (inclusive)?
#[inline]
pub fn within_goal(pos: Vec2, token: Vec2, radius: f32) -> bool {
    pos.distance_squared(token) <= radius * radius
}

/// Goal contact and simultaneous-arrival precedence
#[derive(Debug, Clone, Copy)]
pub struct WinArbiter {
    radius: f32,
}

impl WinArbiter {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn check_goal(&self, racer: &Racer, token: &GoalToken) -> bool {
        self.check_goal_at(racer.pos, token)
    }

    /// Goal contact for a bare position (server-mirrored players)
    pub fn check_goal_at(&self, pos: Vec2, token: &GoalToken) -> bool {
        !token.is_collected() && within_goal(pos, token.pos, self.radius)
    }

    /// Pick this tick's winner among `racers`, in iteration order
    pub fn resolve<'a>(
        &self,
        racers: impl IntoIterator<Item = &'a Racer>,
        token: &GoalToken,
    ) -> Option<RacerId> {
        let mut first_arrival = None;
        for racer in racers {
            if !self.check_goal(racer, token) {
                continue;
            }
            if racer.status.magnetized() {
                return Some(racer.id);
            }
            first_arrival.get_or_insert(racer.id);
        }
        first_arrival
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MovementTuning;
    use crate::sim::racer::RacerKind;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn racer_at(id: RacerId, pos: Vec2) -> Racer {
        let mut rng = Pcg32::seed_from_u64(id as u64);
        let mut r = Racer::new(id, format!("R{id}"), RacerKind::Bot, 10, &MovementTuning::default(), &mut rng);
        r.reset(pos, 0.0);
        r
    }

    #[test]
    fn test_goal_radius_boundary() {
        let arbiter = WinArbiter::new(32.0);
        let token = GoalToken::new(Vec2::new(500.0, 500.0));
        assert!(!arbiter.check_goal(&racer_at(1, Vec2::new(540.0, 500.0)), &token));
        assert!(arbiter.check_goal(&racer_at(1, Vec2::new(520.0, 500.0)), &token));
        assert!(arbiter.check_goal(&racer_at(1, Vec2::new(532.0, 500.0)), &token));
    }

    #[test]
    fn test_collected_token_cannot_be_won_again() {
        let arbiter = WinArbiter::new(32.0);
        let mut token = GoalToken::new(Vec2::ZERO);
        let r = racer_at(1, Vec2::new(1.0, 1.0));
        assert!(token.collect());
        assert!(!token.collect());
        assert!(!arbiter.check_goal(&r, &token));
        assert_eq!(arbiter.resolve([&r], &token), None);
    }

    #[test]
    fn test_first_arrival_wins_without_magnets() {
        let arbiter = WinArbiter::new(32.0);
        let token = GoalToken::new(Vec2::ZERO);
        let racers = vec![
            racer_at(1, Vec2::new(100.0, 0.0)),
            racer_at(2, Vec2::new(10.0, 0.0)),
            racer_at(3, Vec2::new(5.0, 0.0)),
        ];
        assert_eq!(arbiter.resolve(&racers, &token), Some(2));
    }

    #[test]
    fn test_magnetized_tie_break_is_deterministic() {
        let arbiter = WinArbiter::new(32.0);
        let token = GoalToken::new(Vec2::ZERO);
        let mut racers = vec![
            racer_at(1, Vec2::new(3.0, 0.0)),
            racer_at(2, Vec2::new(20.0, 0.0)),
            racer_at(3, Vec2::new(10.0, 0.0)),
        ];
        racers[1].status.magnet_ticks = 50;
        racers[2].status.magnet_ticks = 50;

        // Racer 1 arrived first in order, but racer 2 is the first magnetized arrival
        for _ in 0..10 {
            assert_eq!(arbiter.resolve(&racers, &token), Some(2));
        }
    }
}
