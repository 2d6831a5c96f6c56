//! Wager ledger
//!
//! Bets are taken only while betting is open, priced from the pool at
//! placement time (odds snapshot), and settled exactly once when the race
//! ends. A race without a winner refunds every stake.

use serde::{Deserialize, Serialize};

use super::racer::RacerId;
use crate::error::{RaceError, Result};
use crate::settings::BettingTuning;

/// An immutable wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub bettor_id: String,
    pub racer_id: RacerId,
    pub stake: u64,
    /// Decimal odds snapshot taken at placement
    pub odds: f32,
    /// Session tick or server milliseconds at placement
    pub placed_at: u64,
}

/// How a bet ended
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BetOutcome {
    Won { payout: u64 },
    Lost,
    Refunded { amount: u64 },
}

/// Settlement record for one bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetSettlement {
    pub bettor_id: String,
    pub racer_id: RacerId,
    pub stake: u64,
    pub odds: f32,
    pub outcome: BetOutcome,
}

/// Bets for the current race
#[derive(Debug, Clone, Default)]
pub struct BetLedger {
    bets: Vec<Bet>,
    open: bool,
    settled: bool,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    /// Start a fresh race book
    pub fn open(&mut self) {
        self.bets.clear();
        self.open = true;
        self.settled = false;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn total_pool(&self) -> u64 {
        self.bets.iter().fold(0, |sum, b| sum.saturating_add(b.stake))
    }

    fn pool_on(&self, racer: RacerId) -> u64 {
        self.bets
            .iter()
            .filter(|b| b.racer_id == racer)
            .fold(0, |sum, b| sum.saturating_add(b.stake))
    }

    /// Pari-mutuel odds a new `stake` on `racer` would get right now
    pub fn quote(
        &self,
        racer: RacerId,
        stake: u64,
        roster_len: usize,
        tuning: &BettingTuning,
    ) -> f32 {
        let seed = tuning.seed_liquidity;
        let total = seed
            .saturating_mul(roster_len as u64)
            .saturating_add(self.total_pool())
            .saturating_add(stake);
        let on_target = seed.saturating_add(self.pool_on(racer)).saturating_add(stake);
        if on_target == 0 {
            return tuning.min_odds;
        }
        let odds = (1.0 - tuning.house_edge) * total as f32 / on_target as f32;
        odds.max(tuning.min_odds)
    }

    /// Validate and record a bet; nothing changes on error
    pub fn place(
        &mut self,
        bettor_id: &str,
        racer: RacerId,
        stake: u64,
        roster: &[RacerId],
        placed_at: u64,
        tuning: &BettingTuning,
    ) -> Result<Bet> {
        if !self.open {
            return Err(RaceError::BettingClosed);
        }
        if !roster.contains(&racer) {
            return Err(RaceError::UnknownRacer(racer));
        }
        if stake == 0 {
            return Err(RaceError::ZeroStake);
        }
        if stake > tuning.max_stake {
            return Err(RaceError::StakeTooLarge {
                stake,
                max: tuning.max_stake,
            });
        }
        if self.bets.iter().any(|b| b.bettor_id == bettor_id) {
            return Err(RaceError::DuplicateBet(bettor_id.to_string()));
        }

        let bet = Bet {
            bettor_id: bettor_id.to_string(),
            racer_id: racer,
            stake,
            odds: self.quote(racer, stake, roster.len(), tuning),
            placed_at,
        };
        log::info!(
            "Bet placed: {} backs racer {} for {} at {:.2}",
            bet.bettor_id,
            bet.racer_id,
            bet.stake,
            bet.odds
        );
        self.bets.push(bet.clone());
        Ok(bet)
    }

    /// Settle every bet against `winner`; later calls return nothing
    pub fn settle(&mut self, winner: Option<RacerId>) -> Vec<BetSettlement> {
        if self.settled {
            return Vec::new();
        }
        self.settled = true;
        self.open = false;

        self.bets
            .iter()
            .map(|bet| {
                let outcome = match winner {
                    None => BetOutcome::Refunded { amount: bet.stake },
                    Some(w) if w == bet.racer_id => BetOutcome::Won {
                        payout: (bet.stake as f64 * bet.odds as f64).floor() as u64,
                    },
                    Some(_) => BetOutcome::Lost,
                };
                BetSettlement {
                    bettor_id: bet.bettor_id.clone(),
                    racer_id: bet.racer_id,
                    stake: bet.stake,
                    odds: bet.odds,
                    outcome,
                }
            })
            .collect()
    }
}
