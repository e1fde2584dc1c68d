use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use horse_derby::game::betting::STAKE_CUTOFF_POSITION;
use horse_derby::game::{Lobby, PeerSession, PeerSnapshot, RoundPhase, SessionError, SessionHandle};
use horse_derby::store::InMemoryGameStore;
use horse_derby::{GameConfig, PeerIdentity, PrizeDistribution, SessionConfig};

mod common;

const LOG_TARGET: &str = "bin::derby_sim";

#[derive(Debug, Parser)]
#[command(name = "derby_sim")]
#[command(about = "Run a whole derby with simulated peers on an in-memory store", long_about = None)]
struct Args {
    #[arg(long, default_value_t = 3)]
    players: u8,

    #[arg(long, default_value_t = 4)]
    horses: u8,

    /// winner-takes-all, top-2 or top-3
    #[arg(long, default_value = "winner-takes-all")]
    prize: PrizeDistribution,

    #[arg(long, default_value_t = 0.20)]
    chip_price: f64,

    #[arg(long, default_value_t = 2.00)]
    max_stake: f64,

    /// Seed for the scripted stakes
    #[arg(long, default_value_t = 7)]
    seed: u64,

    #[arg(long, default_value_t = 2_000)]
    betting_window_ms: u64,

    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    #[arg(long, default_value_t = 250)]
    poll_ms: u64,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "DERBY_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    common::load_dotenv();
    let args = Args::parse();
    common::init_tracing(args.json)?;
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    if args.players < 2 {
        bail!("a race needs at least two players");
    }
    let config = GameConfig {
        horse_count: args.horses,
        max_players: args.players,
        initial_chip_price: args.chip_price,
        max_stake: args.max_stake,
        prize_distribution: args.prize,
        ..GameConfig::default()
    };
    let session_config = SessionConfig::default()
        .with_betting_window(Duration::from_millis(args.betting_window_ms))
        .with_settle_delay(Duration::from_millis(args.settle_ms))
        .with_poll_interval(Duration::from_millis(args.poll_ms));

    let store = Arc::new(InMemoryGameStore::new());
    let lobby = Lobby::new(store.clone());
    let riders: Vec<PeerIdentity> = (1..=args.players)
        .map(|n| PeerIdentity::random(format!("rider-{n}")))
        .collect();
    let game = lobby.create_game(&riders[0], config).await?;
    info!(target: LOG_TARGET, game_id = %game.id, players = args.players, "simulated game created");

    let mut handles = Vec::with_capacity(riders.len());
    for rider in &riders {
        let handle = PeerSession::join(
            store.clone(),
            &*store,
            rider.clone(),
            game.id,
            session_config.clone(),
        )
        .await
        .with_context(|| format!("{} failed to join", rider.display_name))?;
        handles.push(handle);
    }
    handles[0].start_game().await.context("failed to start")?;

    let mut tasks = Vec::with_capacity(handles.len());
    for (index, handle) in handles.iter().enumerate() {
        let rng = ChaCha8Rng::seed_from_u64(args.seed.wrapping_add(index as u64));
        tasks.push(tokio::spawn(play(handle.clone(), rng)));
    }
    let mut finals = Vec::with_capacity(tasks.len());
    for task in tasks {
        finals.push(task.await??);
    }

    let reference = &finals[0];
    for (index, snapshot) in finals.iter().enumerate().skip(1) {
        if snapshot.horses != reference.horses || snapshot.settlement != reference.settlement {
            warn!(target: LOG_TARGET, peer = index, "peer finished with a different view");
        }
    }

    if let Some(game) = &reference.game {
        println!(
            "race over after {} rounds, winner horse {}",
            game.current_round,
            game.winner_horse.map_or_else(|| "none".to_string(), |h| h.to_string())
        );
    }
    for horse in &reference.horses {
        println!("  {} {:<18} {:>2}", horse.number, horse.name, horse.position);
    }
    if let Some(report) = &reference.settlement {
        common::print_report(report);
    }

    for handle in &handles {
        handle.leave().await;
    }
    Ok(())
}

/// Each open round: maybe buy a few chips on a horse still taking stakes,
/// then close the window.
async fn play(peer: SessionHandle, mut rng: ChaCha8Rng) -> Result<PeerSnapshot> {
    let mut last_round = 0;
    loop {
        let snapshot = peer
            .wait_until(move |s| {
                s.is_finished()
                    || s.ended
                    || matches!(s.phase, RoundPhase::BettingOpen { round } if round > last_round)
            })
            .await?;
        let RoundPhase::BettingOpen { round } = snapshot.phase else {
            break;
        };
        last_round = round;

        let open: Vec<u8> = snapshot
            .horses
            .iter()
            .filter(|horse| horse.position < STAKE_CUTOFF_POSITION)
            .map(|horse| horse.number)
            .collect();
        let backs = round == 1 || rng.gen_bool(0.5);
        if let (true, Some(&horse)) = (backs, open.choose(&mut rng)) {
            let chips = rng.gen_range(1..=3);
            match peer.place_stake(horse, chips).await {
                Ok(_) => {}
                Err(err @ SessionError::Stake(_)) => {
                    info!(target: LOG_TARGET, round, error = %err, "stake refused")
                }
                Err(err) => return Err(err.into()),
            }
        }
        match peer.close_window().await {
            Ok(()) | Err(SessionError::Stake(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(peer.wait_until(|s| s.settlement.is_some() || s.ended).await?)
}
