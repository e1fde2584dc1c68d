//! Shared state store.
//!
//! Peers coordinate only through this trait. Every step that must happen
//! exactly once goes through [`GameStore::try_transition`]: a predicate on the
//! current game row plus a patch, applied atomically or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deck::DrawnCard;
use crate::domain::{
    BetRow, GameConfig, GameId, GameRow, GameStatus, HorseNumber, Participant, PlayerRoundState,
    RoundNumber, UserId,
};

pub mod entity;
mod error;
mod in_memory;
mod sea_orm;

pub use error::StoreError;
pub use in_memory::InMemoryGameStore;
pub use self::sea_orm::SeaOrmGameStore;

#[derive(Debug, Clone)]
pub struct NewGame {
    pub created_by: UserId,
    pub config: GameConfig,
    pub invite_code: Option<String>,
}

/// One stake purchase. The store adds it onto any existing
/// `(game, user, horse)` record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStake {
    pub game_id: GameId,
    pub user_id: UserId,
    pub horse_number: HorseNumber,
    pub amount: f64,
    pub chips: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GameFilter {
    pub statuses: Vec<GameStatus>,
    pub include_private: bool,
}

impl GameFilter {
    /// Public rooms still waiting for players.
    pub fn joinable() -> Self {
        Self {
            statuses: vec![GameStatus::Waiting],
            include_private: false,
        }
    }

    pub fn matches(&self, row: &GameRow) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&row.status))
            && (self.include_private || !row.config.is_private)
    }
}

/// Predicate over the stored game row. Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameGuard {
    pub status: Option<GameStatus>,
    pub current_round: Option<RoundNumber>,
    pub betting_phase: Option<bool>,
    pub timer_started: Option<bool>,
    pub current_card_index: Option<u32>,
}

impl GameGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: GameStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn round(mut self, round: RoundNumber) -> Self {
        self.current_round = Some(round);
        self
    }

    pub fn betting_phase(mut self, open: bool) -> Self {
        self.betting_phase = Some(open);
        self
    }

    pub fn timer_started(mut self, started: bool) -> Self {
        self.timer_started = Some(started);
        self
    }

    pub fn card_index(mut self, index: u32) -> Self {
        self.current_card_index = Some(index);
        self
    }

    pub fn matches(&self, row: &GameRow) -> bool {
        self.status.map_or(true, |v| row.status == v)
            && self.current_round.map_or(true, |v| row.current_round == v)
            && self.betting_phase.map_or(true, |v| row.betting_phase == v)
            && self.timer_started.map_or(true, |v| row.timer_started == v)
            && self
                .current_card_index
                .map_or(true, |v| row.current_card_index == v)
    }
}

/// Columns written by a transition. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamePatch {
    pub status: Option<GameStatus>,
    pub current_round: Option<RoundNumber>,
    pub betting_phase: Option<bool>,
    pub timer_started: Option<bool>,
    pub round_started_at: Option<DateTime<Utc>>,
    pub cards_drawn: Option<Vec<DrawnCard>>,
    pub current_card_index: Option<u32>,
    pub winner_horse: Option<HorseNumber>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GamePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: GameStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn round(mut self, round: RoundNumber) -> Self {
        self.current_round = Some(round);
        self
    }

    pub fn betting_phase(mut self, open: bool) -> Self {
        self.betting_phase = Some(open);
        self
    }

    pub fn timer_started(mut self, started: bool) -> Self {
        self.timer_started = Some(started);
        self
    }

    pub fn round_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.round_started_at = Some(at);
        self
    }

    pub fn cards_drawn(mut self, cards: Vec<DrawnCard>) -> Self {
        self.cards_drawn = Some(cards);
        self
    }

    pub fn card_index(mut self, index: u32) -> Self {
        self.current_card_index = Some(index);
        self
    }

    pub fn winner_horse(mut self, horse: HorseNumber) -> Self {
        self.winner_horse = Some(horse);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    pub fn apply(&self, row: &mut GameRow) {
        if let Some(status) = self.status {
            row.status = status;
        }
        if let Some(round) = self.current_round {
            row.current_round = round;
        }
        if let Some(open) = self.betting_phase {
            row.betting_phase = open;
        }
        if let Some(started) = self.timer_started {
            row.timer_started = started;
        }
        if let Some(at) = self.round_started_at {
            row.round_started_at = Some(at);
        }
        if let Some(cards) = &self.cards_drawn {
            row.cards_drawn = cards.clone();
        }
        if let Some(index) = self.current_card_index {
            row.current_card_index = index;
        }
        if let Some(horse) = self.winner_horse {
            row.winner_horse = Some(horse);
        }
        if let Some(at) = self.started_at {
            row.started_at = Some(at);
        }
        if let Some(at) = self.finished_at {
            row.finished_at = Some(at);
        }
    }
}

/// Outcome of a conditional update. Losing is the normal outcome for every
/// peer but one and is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(GameRow),
    Lost,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn applied(self) -> Option<GameRow> {
        match self {
            Transition::Applied(row) => Some(row),
            Transition::Lost => None,
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn insert_game(&self, game: NewGame) -> Result<GameRow, StoreError>;

    async fn load_game(&self, id: GameId) -> Result<Option<GameRow>, StoreError>;

    /// Newest first.
    async fn find_games(&self, filter: &GameFilter) -> Result<Vec<GameRow>, StoreError>;

    async fn find_game_by_invite(&self, code: &str) -> Result<Option<GameRow>, StoreError>;

    /// Deletes the game and everything hanging off it when `guard` holds.
    async fn delete_game(&self, id: GameId, guard: &GameGuard) -> Result<bool, StoreError>;

    async fn try_transition(
        &self,
        id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> Result<Transition, StoreError>;

    /// Idempotent on `(game, user)`; a repeat join refreshes the display name.
    async fn upsert_participant(&self, participant: Participant)
        -> Result<Participant, StoreError>;

    /// Ordered by join time.
    async fn load_participants(&self, game_id: GameId) -> Result<Vec<Participant>, StoreError>;

    /// Atomically adds `stake` onto the `(game, user, horse)` record.
    async fn accumulate_bet(&self, stake: NewStake) -> Result<BetRow, StoreError>;

    async fn load_bets(&self, game_id: GameId) -> Result<Vec<BetRow>, StoreError>;

    /// Idempotent on `(game, user, round)`.
    async fn upsert_player_state(
        &self,
        state: PlayerRoundState,
    ) -> Result<PlayerRoundState, StoreError>;

    async fn load_player_states(
        &self,
        game_id: GameId,
        round: RoundNumber,
    ) -> Result<Vec<PlayerRoundState>, StoreError>;
}
