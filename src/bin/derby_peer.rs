use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use horse_derby::feed::{SupabaseRealtimeFeed, SupabaseRealtimeFeedConfig};
use horse_derby::game::{Lobby, PeerSession, PeerSnapshot, RoundPhase, SessionHandle};
use horse_derby::{GameConfig, GameId, PeerIdentity, PrizeDistribution, SessionConfig};

mod common;

const LOG_TARGET: &str = "bin::derby_peer";

#[derive(Debug, Parser)]
#[command(name = "derby_peer")]
#[command(about = "Play a horse derby game as one peer", long_about = None)]
struct Args {
    /// SeaORM-compatible Postgres URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Supabase REST base URL (used to derive realtime websocket URL)
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Supabase anon key for realtime websocket auth
    #[arg(long, env = "SUPABASE_ANON_KEY")]
    supabase_anon_key: String,

    /// Optional explicit Supabase realtime websocket URL
    #[arg(long, env = "SUPABASE_REALTIME_URL")]
    supabase_realtime_url: Option<String>,

    /// Stable user id; a random one is used when absent
    #[arg(long, env = "DERBY_USER_ID")]
    user_id: Option<Uuid>,

    #[arg(long, env = "DERBY_PLAYER_NAME", default_value = "player")]
    name: String,

    /// Join this game
    #[arg(long, conflicts_with_all = ["invite", "create", "list"])]
    game: Option<GameId>,

    /// Join the private game with this invite code
    #[arg(long, conflicts_with_all = ["create", "list"])]
    invite: Option<String>,

    /// Create a new game and join it
    #[arg(long, default_value_t = false)]
    create: bool,

    /// List public games waiting for players and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    #[arg(long, default_value_t = 4)]
    horses: u8,

    #[arg(long, default_value_t = 3)]
    max_players: u8,

    #[arg(long, default_value_t = 0.20)]
    chip_price: f64,

    #[arg(long, default_value_t = 2.00)]
    max_stake: f64,

    /// winner-takes-all, top-2 or top-3
    #[arg(long, default_value = "winner-takes-all")]
    prize: PrizeDistribution,

    #[arg(long, default_value_t = false)]
    private: bool,

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
    let realtime_url = match &args.supabase_realtime_url {
        Some(url) => Url::parse(url).context("invalid SUPABASE_REALTIME_URL")?,
        None => derive_realtime_url(&args.supabase_url)?,
    };
    let db = connect_database(&args.database_url).await?;
    let lobby = Lobby::from_sea_orm(db);
    let store = Arc::clone(lobby.store());
    let identity = PeerIdentity::new(
        args.user_id.unwrap_or_else(Uuid::new_v4),
        args.name.clone(),
    );

    if args.list {
        let games = lobby.list_open_games().await?;
        if games.is_empty() {
            println!("no open games");
        }
        for game in games {
            println!(
                "{}  {} horses  up to {} players  chip €{:.2}  {}",
                game.id,
                game.config.horse_count,
                game.config.max_players,
                game.config.initial_chip_price,
                game.config.prize_distribution
            );
        }
        return Ok(());
    }

    let game_id = if args.create {
        let config = GameConfig {
            horse_count: args.horses,
            max_players: args.max_players,
            initial_chip_price: args.chip_price,
            max_stake: args.max_stake,
            prize_distribution: args.prize,
            entry_fee: 0,
            is_private: args.private,
        };
        let game = lobby.create_game(&identity, config).await?;
        println!("created game {}", game.id);
        if let Some(code) = &game.invite_code {
            println!("invite code: {code}");
        }
        game.id
    } else if let Some(code) = &args.invite {
        lobby.find_by_invite(code).await?.id
    } else {
        args.game
            .ok_or_else(|| anyhow!("pass --game <id>, --invite <code> or --create"))?
    };

    let feed = SupabaseRealtimeFeed::new(SupabaseRealtimeFeedConfig::new(
        realtime_url.clone(),
        args.supabase_anon_key.clone(),
    ));
    let session_config = SessionConfig::default();
    let pacing = session_config.reveal_pacing;
    let handle = PeerSession::join(store, &feed, identity.clone(), game_id, session_config)
        .await
        .context("failed to join game")?;
    info!(
        target: LOG_TARGET,
        game_id = %game_id,
        user_id = %identity.user_id,
        realtime = %realtime_url,
        "joined"
    );

    let printer = tokio::spawn(print_updates(handle.watch(), pacing));
    println!("commands: start | bet <horse> <chips> | close | status | refresh | quit");
    let outcome = command_loop(&handle).await;
    handle.leave().await;
    printer.abort();
    outcome
}

async fn command_loop(handle: &SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] => return Ok(()),
            ["start"] => handle.start_game().await.map(|()| "race started".to_string()),
            ["close"] => handle
                .close_window()
                .await
                .map(|()| "window closed".to_string()),
            ["refresh"] => handle.refresh().await.map(|()| "refreshed".to_string()),
            ["status"] => {
                println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);
                continue;
            }
            ["bet", horse, chips] => {
                let (Ok(horse), Ok(chips)) = (horse.parse::<u8>(), chips.parse::<u32>()) else {
                    println!("usage: bet <horse> <chips>");
                    continue;
                };
                handle
                    .place_stake(horse, chips)
                    .await
                    .map(|bet| {
                        format!(
                            "horse {} now carries €{:.2} of yours",
                            bet.horse_number, bet.amount
                        )
                    })
            }
            _ => {
                println!("unknown command `{line}`");
                continue;
            }
        };
        match result {
            Ok(message) => println!("{message}"),
            Err(err) if err.is_rejection() => println!("rejected: {err}"),
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "command failed");
                println!("error: {err}");
            }
        }
    }
}

async fn print_updates(mut rx: watch::Receiver<PeerSnapshot>, pacing: Duration) {
    let mut last_phase = None;
    let mut last_reveal = None;
    let mut reported = false;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();

        if let Some(reveal) = &snapshot.reveal {
            if last_reveal != Some(reveal.round) {
                last_reveal = Some(reveal.round);
                println!("-- round {} cards --", reveal.round);
                for movement in &reveal.movements {
                    match movement.to {
                        Some(to) => println!(
                            "  {}: horse {} {} -> {}",
                            movement.card, movement.horse_number, movement.from, to
                        ),
                        None => println!(
                            "  {}: horse {} already home",
                            movement.card, movement.horse_number
                        ),
                    }
                    tokio::time::sleep(pacing).await;
                }
                print_track(&snapshot);
            }
        }

        if last_phase != Some(snapshot.phase) {
            last_phase = Some(snapshot.phase);
            match snapshot.phase {
                RoundPhase::Waiting => println!(
                    "waiting for the creator to start ({} joined)",
                    snapshot.roster.len()
                ),
                RoundPhase::BettingOpen { round } => {
                    println!("round {round}: betting open");
                    for (horse, price) in &snapshot.chip_prices {
                        println!("  horse {horse}: €{price:.2} per chip");
                    }
                }
                RoundPhase::Drawn { round } => println!("round {round}: betting closed"),
                RoundPhase::Finished => println!("race finished"),
            }
        }

        if let Some(countdown) = snapshot.countdown {
            if snapshot.phase == (RoundPhase::BettingOpen { round: countdown.round }) {
                println!("  {}s left to bet", countdown.remaining().as_secs());
            }
        }

        if !reported {
            if let Some(report) = &snapshot.settlement {
                common::print_report(report);
                reported = true;
            }
        }
        if snapshot.ended {
            println!("session ended");
            break;
        }
    }
}

fn print_track(snapshot: &PeerSnapshot) {
    for horse in &snapshot.horses {
        let lane: String = (0..=20)
            .map(|cell| if cell == horse.position { '>' } else if cell == 11 { '|' } else { '.' })
            .collect();
        println!("  {} {:<18} {lane}", horse.number, horse.name);
    }
}

fn derive_realtime_url(rest_base: &str) -> Result<Url> {
    let mut base = Url::parse(rest_base).context("invalid SUPABASE_URL")?;
    let target_scheme = match base.scheme() {
        "https" => "wss".to_string(),
        "http" => "ws".to_string(),
        other => other.to_string(),
    };
    base.set_path("/realtime/v1");
    base.set_query(None);
    base.set_fragment(None);
    if base.set_scheme(&target_scheme).is_err() {
        bail!("failed to convert Supabase URL scheme");
    }
    Ok(base)
}

async fn connect_database(database_url: &str) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(5)
        .min_connections(1)
        .sqlx_logging(false);
    Database::connect(opts)
        .await
        .with_context(|| format!("failed to connect to database at {database_url}"))
}
