//! Bootstrap and report helpers shared by the derby binaries.

use std::path::PathBuf;

use anyhow::Result;
use horse_derby::game::Settlement;
use tracing_subscriber::{fmt, EnvFilter};

pub fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

pub fn print_report(report: &Settlement) {
    println!(
        "== results ({}, pool €{:.2}) ==",
        report.distribution, report.total_pool
    );
    if report.podium.is_empty() {
        println!("no horse crossed the line; nobody is paid");
    }
    for place in &report.podium {
        println!(
            "{}. horse {} {:<18} {:>3.0}%  prize €{:.2}  backed €{:.2}",
            place.place,
            place.horse_number,
            place.horse_name,
            place.share_percent,
            place.prize,
            place.backed_amount
        );
    }
    println!("{:<20} {:>9} {:>9} {:>9}", "player", "staked", "won", "profit");
    for player in &report.players {
        println!(
            "{:<20} {:>9.2} {:>9.2} {:>+9.2}",
            player.display_name, player.total_staked, player.total_won, player.profit
        );
    }
}
