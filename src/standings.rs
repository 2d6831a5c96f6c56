//! Final race standings
//!
//! Finishers rank first by finish time, then everyone else by how close
//! they got to the goal token. Shared by local sessions and server rooms so
//! both produce identical orderings from identical inputs.

use serde::{Deserialize, Serialize};

use crate::sim::RacerId;

/// Raw per-racer result fed into the ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandingInput {
    pub player_id: RacerId,
    /// Seconds since race start, if the racer reached the token
    pub finish_time: Option<f32>,
    pub distance_to_token: f32,
}

/// A single ranked entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub player_id: RacerId,
    /// 1-indexed place
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finish_time: Option<f32>,
    pub distance_to_token: f32,
}

impl Standing {
    pub fn finished(&self) -> bool {
        self.finish_time.is_some()
    }
}

/// Rank racers: finishers by finish time, then non-finishers by distance.
///
/// Ties keep input order (the sort is stable), so callers iterating in id
/// order get a deterministic result.
pub fn compute_standings(inputs: impl IntoIterator<Item = StandingInput>) -> Vec<Standing> {
    let mut finishers = Vec::new();
    let mut others = Vec::new();
    for input in inputs {
        if input.finish_time.is_some() {
            finishers.push(input);
        } else {
            others.push(input);
        }
    }

    finishers.sort_by(|a, b| {
        let ta = a.finish_time.unwrap_or(f32::INFINITY);
        let tb = b.finish_time.unwrap_or(f32::INFINITY);
        ta.total_cmp(&tb)
    });
    others.sort_by(|a, b| a.distance_to_token.total_cmp(&b.distance_to_token));

    finishers
        .into_iter()
        .chain(others)
        .enumerate()
        .map(|(i, input)| Standing {
            player_id: input.player_id,
            position: i as u32 + 1,
            finish_time: input.finish_time,
            distance_to_token: input.distance_to_token,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(id: RacerId, finish: Option<f32>, dist: f32) -> StandingInput {
        StandingInput {
            player_id: id,
            finish_time: finish,
            distance_to_token: dist,
        }
    }

    #[test]
    fn test_finishers_before_non_finishers() {
        let standings = compute_standings([
            input(1, None, 10.0),
            input(2, Some(42.0), 0.0),
            input(3, None, 5.0),
        ]);
        let order: Vec<_> = standings.iter().map(|s| s.player_id).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(standings[0].position, 1);
        assert_eq!(standings[2].position, 3);
    }

    #[test]
    fn test_finish_time_order() {
        let standings = compute_standings([input(1, Some(30.0), 0.0), input(2, Some(20.0), 3.0)]);
        assert_eq!(standings[0].player_id, 2);
        assert_eq!(standings[1].player_id, 1);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let standings = compute_standings([input(7, None, 4.0), input(3, None, 4.0)]);
        assert_eq!(standings[0].player_id, 7);
    }

    #[test]
    fn test_wire_shape() {
        let standings = compute_standings([input(5, None, 12.5)]);
        let json = serde_json::to_value(&standings[0]).unwrap();
        assert_eq!(json["playerId"], 5);
        assert_eq!(json["distanceToToken"], 12.5);
        assert!(json.get("finishTime").is_none());
    }

    proptest! {
        #[test]
        fn prop_standings_are_ordered(
            entries in prop::collection::vec((prop::option::of(0.0f32..300.0), 0.0f32..2000.0), 0..20)
        ) {
            let inputs: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(i, (f, d))| input(i as RacerId, *f, *d))
                .collect();
            let standings = compute_standings(inputs.clone());
            prop_assert_eq!(standings.len(), inputs.len());

            for pair in standings.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert_eq!(b.position, a.position + 1);
                match (a.finish_time, b.finish_time) {
                    (Some(ta), Some(tb)) => prop_assert!(ta <= tb),
                    (None, Some(_)) => prop_assert!(false, "non-finisher ranked above finisher"),
                    (Some(_), None) => {}
                    (None, None) => prop_assert!(a.distance_to_token <= b.distance_to_token),
                }
            }
        }
    }
}
