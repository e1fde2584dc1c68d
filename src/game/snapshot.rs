//! Plain-data view of a peer session, published over a `watch` channel.

use serde::Serialize;
use tokio::time::Instant;

use crate::deck::DrawnCard;
use crate::domain::{GameRow, HorseNumber, RoundNumber, UserId};
use crate::race::{Horse, Movement};

use super::round::RoundPhase;
use super::settlement::Settlement;

/// Cards of one drawn round with their effect, in draw order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReveal {
    pub round: RoundNumber,
    pub cards: Vec<DrawnCard>,
    pub movements: Vec<Movement>,
}

/// Local betting countdown. Deadlines are per peer and never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub round: RoundNumber,
    pub deadline: Instant,
}

impl Countdown {
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterEntry {
    pub user_id: UserId,
    pub display_name: String,
    /// Closed the window of the current round.
    pub window_closed: bool,
    pub total_staked: f64,
    pub is_creator: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerSnapshot {
    pub game: Option<GameRow>,
    pub phase: RoundPhase,
    pub horses: Vec<Horse>,
    pub reveal: Option<RoundReveal>,
    #[serde(skip)]
    pub countdown: Option<Countdown>,
    pub roster: Vec<RosterEntry>,
    pub own_stakes: Vec<(HorseNumber, f64)>,
    pub own_window_closed: bool,
    /// Current chip price per horse.
    pub chip_prices: Vec<(HorseNumber, f64)>,
    pub settlement: Option<Settlement>,
    pub last_error: Option<String>,
    /// The session stopped: the peer left or the game was deleted.
    pub ended: bool,
}

impl PeerSnapshot {
    pub fn round(&self) -> Option<RoundNumber> {
        match self.phase {
            RoundPhase::BettingOpen { round } | RoundPhase::Drawn { round } => Some(round),
            RoundPhase::Waiting => None,
            RoundPhase::Finished => self.game.as_ref().map(|game| game.current_round),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == RoundPhase::Finished
    }

    pub fn staked_total(&self) -> f64 {
        self.own_stakes.iter().map(|(_, amount)| amount).sum()
    }
}
