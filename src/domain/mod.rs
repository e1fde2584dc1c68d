//! Core row types shared by the store, the change feed and the peer session.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deck::DrawnCard;

mod game_config;

pub use game_config::{ConfigError, GameConfig, PrizeDistribution};

/// ---------- Common type aliases ----------
pub type GameId = Uuid;
pub type UserId = Uuid;
/// 1-based horse number. Horse `n` runs on the `n`-th suit of the deck.
pub type HorseNumber = u8;
pub type RoundNumber = u32;

/// ---------- Race constants ----------
pub const MAX_ROUNDS: RoundNumber = 8;
pub const CARDS_PER_ROUND: usize = 5;
/// A horse has finished once its position is strictly greater than this.
pub const FINISH_LINE: u8 = 10;
pub const TRACK_LENGTH: u8 = 20;
pub const MIN_PARTICIPANTS_TO_START: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// ---------- Enums ----------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Running,
    Finished,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Running => "running",
            GameStatus::Finished => "finished",
        }
    }

    /// Status only ever moves forward, so its rank orders rows by progress.
    fn rank(self) -> u8 {
        match self {
            GameStatus::Waiting => 0,
            GameStatus::Running => 1,
            GameStatus::Finished => 2,
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(GameStatus::Waiting),
            "running" => Ok(GameStatus::Running),
            "finished" => Ok(GameStatus::Finished),
            other => Err(UnknownVariant {
                kind: "game status",
                value: other.to_string(),
            }),
        }
    }
}

/// ---------- Rows ----------

/// The shared game record. Every peer treats the stored copy as the only
/// source of truth; local copies are views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRow {
    pub id: GameId,
    pub created_by: UserId,
    pub config: GameConfig,
    pub invite_code: Option<String>,
    pub status: GameStatus,
    pub current_round: RoundNumber,
    pub betting_phase: bool,
    pub timer_started: bool,
    pub round_started_at: Option<DateTime<Utc>>,
    pub cards_drawn: Vec<DrawnCard>,
    pub current_card_index: u32,
    pub winner_horse: Option<HorseNumber>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GameRow {
    pub fn is_creator(&self, user: UserId) -> bool {
        self.created_by == user
    }

    /// The current round accepts stakes and closes.
    pub fn betting_open(&self) -> bool {
        self.status == GameStatus::Running && self.betting_phase && self.cards_drawn.is_empty()
    }

    /// The current round's cards are on the table and the next step is pending.
    pub fn round_drawn(&self) -> bool {
        self.status == GameStatus::Running && !self.betting_phase && !self.cards_drawn.is_empty()
    }

    /// Lexicographic progress marker. A row with a smaller key than the one a
    /// peer already holds is stale and must not overwrite the local view.
    pub fn progress_key(&self) -> (u8, RoundNumber, u32, bool, bool) {
        (
            self.status.rank(),
            self.current_round,
            self.current_card_index,
            !self.betting_phase,
            self.timer_started,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub game_id: GameId,
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// Accumulated stake of one user on one horse. Not scoped to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRow {
    pub game_id: GameId,
    pub user_id: UserId,
    pub horse_number: HorseNumber,
    pub amount: f64,
    pub chips: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRoundState {
    pub game_id: GameId,
    pub user_id: UserId,
    pub round: RoundNumber,
    pub betting_window_closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Stable identity handed over by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

impl PeerIdentity {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }

    /// Fresh identity with a random user id, for simulations and tests.
    pub fn random(display_name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixtures, serde::assert_round_trip_eq};

    #[test]
    fn status_parses_its_own_label() {
        for status in [GameStatus::Waiting, GameStatus::Running, GameStatus::Finished] {
            assert_eq!(status.as_str().parse::<GameStatus>(), Ok(status));
        }
        let err = "paused".parse::<GameStatus>().unwrap_err();
        assert_eq!(err.value, "paused");
    }

    #[test]
    fn progress_key_orders_round_life_cycle() {
        let mut row = fixtures::running_game(GameConfig::default());
        let open = row.progress_key();

        row.betting_phase = false;
        row.cards_drawn = fixtures::some_cards();
        row.current_card_index = 5;
        let drawn = row.progress_key();

        row.betting_phase = true;
        row.cards_drawn.clear();
        row.current_round = 2;
        let next_open = row.progress_key();

        row.status = GameStatus::Finished;
        let finished = row.progress_key();

        assert!(open < drawn);
        assert!(drawn < next_open);
        assert!(next_open < finished);
    }

    #[test]
    fn round_flags_follow_betting_phase() {
        let mut row = fixtures::running_game(GameConfig::default());
        assert!(row.betting_open());
        assert!(!row.round_drawn());

        row.betting_phase = false;
        row.cards_drawn = fixtures::some_cards();
        assert!(!row.betting_open());
        assert!(row.round_drawn());
    }

    #[test]
    fn game_row_serde_round_trip() {
        let mut row = fixtures::running_game(GameConfig::default());
        row.cards_drawn = fixtures::some_cards();
        assert_round_trip_eq(&row);
    }
}
