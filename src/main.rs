//! Blind Derby entry point
//!
//! Runs a headless local race session for a few cycles and mirrors every
//! racer into an authoritative room, the way a client and the server would
//! see the same race. The room keeps its own clock and decides every race;
//! the session adopts the room's verdict and any disagreement is logged.

use std::process::ExitCode;
use std::str::FromStr;

use rand::SeedableRng;
use rand_pcg::Pcg32;

use blind_derby::server::{PositionUpdate, RoomState};
use blind_derby::sim::{RaceEvent, RaceOutcome, RacePhase, RaceSession, RosterEntry, Track};
use blind_derby::{RaceSettings, Result};

const ROOM_ID: &str = "local";
const DEFAULT_SEED: u64 = 0xD3B7;
const DEFAULT_RACES: u32 = 3;
const BOTS: usize = 5;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Blind Derby (headless) starting...");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring unparsable {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn run() -> Result<()> {
    let settings = match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DERBY_CONFIG").ok())
    {
        Some(path) => RaceSettings::load(path)?,
        None => RaceSettings::default(),
    };
    let seed: u64 = env_or("DERBY_SEED", DEFAULT_SEED);
    let races: u32 = env_or("DERBY_RACES", DEFAULT_RACES);
    log::info!("Seed {}, running {} races", seed, races);

    let mut rng = Pcg32::seed_from_u64(seed);
    let track = Track::generate(&settings.track, &mut rng);

    let mut roster = vec![RosterEntry::player("Player")];
    roster.extend((1..=BOTS).map(|i| RosterEntry::bot(format!("Bot {}", i))));

    let mut session =
        RaceSession::with_track(ROOM_ID, settings.clone(), seed, track.clone(), &roster)?;
    let mut room = RoomState::new(ROOM_ID, settings.clone(), seed, track, 0)?;
    for racer in session.racers() {
        room.join(racer.id, racer.name.clone());
    }
    prepare_betting(&mut session, &mut room)?;

    let tick_rate = u64::from(settings.timing.tick_rate);
    let now_ms = |ticks: u64| ticks * 1000 / tick_rate;

    let mut completed = 0;
    let mut local: Option<RaceOutcome> = None;
    let mut authoritative: Option<RaceOutcome> = None;

    while completed < races {
        let before = session.phase();
        session.tick();
        let after = session.phase();
        let now = now_ms(session.time_ticks());

        if before == RacePhase::Betting && after == RacePhase::Racing {
            room.begin_racing(now);
        }

        if room.phase() == RacePhase::Racing {
            mirror_positions(&session, &mut room, now);
        }
        if room.deadline().is_some_and(|deadline| now >= deadline) {
            room.on_deadline(room.epoch(), now);
        }
        // The room's verdict is final; the local session only follows it
        if session.phase() == RacePhase::Racing && room.race_index() == session.race_index() {
            if let Some(outcome) = room.last_outcome() {
                session.end_race(outcome.end_reason, outcome.winner_id);
            }
        }

        for event in session.drain_events() {
            match event {
                RaceEvent::RaceWon(outcome) | RaceEvent::RaceFinished(outcome) => {
                    local = Some(outcome)
                }
                RaceEvent::BetResolved { settlement, .. } => {
                    log::info!("Local settlement: {:?}", settlement)
                }
                other => log::debug!("Local event: {:?}", other),
            }
        }
        for event in room.drain_events() {
            if let Some(outcome) = event.outcome() {
                authoritative = Some(outcome.clone());
            }
        }

        if let (Some(l), Some(a)) = (&local, &authoritative) {
            completed += 1;
            report(completed, l, a);
            local = None;
            authoritative = None;
        }

        if before == RacePhase::Results && after == RacePhase::Betting {
            room.reset_for_next_race(now);
            prepare_betting(&mut session, &mut room)?;
        }
    }

    log::info!("Done after {} races", completed);
    Ok(())
}

/// Sync the session to the room's layout and put a house bet on the book
fn prepare_betting(session: &mut RaceSession, room: &mut RoomState) -> Result<()> {
    session.adopt_layout(room.start(), room.token().pos)?;

    let ids = session.racer_ids();
    let pick = ids[session.race_index() as usize % ids.len()];
    let now = session.time_ticks();
    session.place_bet("house", pick, 100)?;
    if let Err(e) = room.place_bet("house", pick, 100, now) {
        log::warn!("Room refused the house bet: {}", e);
    }
    log::info!("House backs racer {} in race {}", pick, session.race_index());
    Ok(())
}

fn mirror_positions(session: &RaceSession, room: &mut RoomState, now: u64) {
    for racer in session.racers() {
        let update = PositionUpdate {
            room_id: ROOM_ID.to_string(),
            player_id: racer.id,
            position: racer.pos,
            velocity: racer.velocity,
            direction: racer.heading,
            timestamp: session.time_ticks(),
        };
        match room.apply_position_update(&update, now) {
            Ok(Some(outcome)) => log::debug!("Room verdict: {:?}", outcome.winner_id),
            Ok(None) => {}
            // Rejections are logged by the room; later reports resync
            Err(e) => log::debug!("{}", e),
        }
    }
}

fn report(race: u32, local: &RaceOutcome, authoritative: &RaceOutcome) {
    log::info!(
        "Race {}: local {:?} by {:?}, room {:?} by {:?}",
        race,
        local.winner_id,
        local.end_reason,
        authoritative.winner_id,
        authoritative.end_reason
    );
    if local.winner_id != authoritative.winner_id {
        log::warn!(
            "Race {}: local winner {:?} disagrees with room winner {:?}; keeping the room's",
            race,
            local.winner_id,
            authoritative.winner_id
        );
    }
    for standing in &authoritative.standings {
        log::info!(
            "  #{} racer {} ({:.1} from token)",
            standing.position,
            standing.player_id,
            standing.distance_to_token
        );
    }
}
