use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{
    BetRow, GameId, GameRow, GameStatus, HorseNumber, Participant, PlayerRoundState, RoundNumber,
    UserId,
};
use crate::feed::{ChangeEvent, ChangeFeed, FeedSubscription};

use super::{
    GameFilter, GameGuard, GamePatch, GameStore, NewGame, NewStake, StoreError, Transition,
};

const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    games: HashMap<GameId, GameRow>,
    participants: BTreeMap<(GameId, UserId), Participant>,
    bets: BTreeMap<(GameId, UserId, HorseNumber), BetRow>,
    player_states: BTreeMap<(GameId, RoundNumber, UserId), PlayerRoundState>,
}

/// Process-local store that doubles as its own change feed. Every write
/// publishes the written row to the game's broadcast channel once the lock
/// is released.
#[derive(Clone)]
pub struct InMemoryGameStore {
    inner: Arc<RwLock<Inner>>,
    feeds: Arc<DashMap<GameId, broadcast::Sender<ChangeEvent>>>,
    feed_capacity: usize,
    feed_muted: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(feed_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            feeds: Arc::new(DashMap::new()),
            feed_capacity,
            feed_muted: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops publishing change events. Writes still land.
    pub fn mute_feed(&self, muted: bool) {
        self.feed_muted.store(muted, Ordering::SeqCst);
    }

    /// Makes every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store switched off"));
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        if self.feed_muted.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.feeds.get(&event.game_id()) {
            // no receivers is fine
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn insert_game(&self, game: NewGame) -> Result<GameRow, StoreError> {
        self.check_available()?;
        let row = GameRow {
            id: Uuid::new_v4(),
            created_by: game.created_by,
            config: game.config,
            invite_code: game.invite_code,
            status: GameStatus::Waiting,
            current_round: 0,
            betting_phase: false,
            timer_started: false,
            round_started_at: None,
            cards_drawn: Vec::new(),
            current_card_index: 0,
            winner_horse: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.inner.write().games.insert(row.id, row.clone());
        Ok(row)
    }

    async fn load_game(&self, id: GameId) -> Result<Option<GameRow>, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().games.get(&id).cloned())
    }

    async fn find_games(&self, filter: &GameFilter) -> Result<Vec<GameRow>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<GameRow> = self
            .inner
            .read()
            .games
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn find_game_by_invite(&self, code: &str) -> Result<Option<GameRow>, StoreError> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .games
            .values()
            .find(|row| row.invite_code.as_deref() == Some(code))
            .cloned())
    }

    async fn delete_game(&self, id: GameId, guard: &GameGuard) -> Result<bool, StoreError> {
        self.check_available()?;
        {
            let mut inner = self.inner.write();
            match inner.games.get(&id) {
                Some(row) if guard.matches(row) => {}
                _ => return Ok(false),
            }
            inner.games.remove(&id);
            inner.participants.retain(|(game, _), _| *game != id);
            inner.bets.retain(|(game, _, _), _| *game != id);
            inner.player_states.retain(|(game, _, _), _| *game != id);
        }
        self.publish(ChangeEvent::GameDeleted(id));
        Ok(true)
    }

    async fn try_transition(
        &self,
        id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> Result<Transition, StoreError> {
        self.check_available()?;
        let updated = {
            let mut inner = self.inner.write();
            let Some(row) = inner.games.get_mut(&id) else {
                return Ok(Transition::Lost);
            };
            if !guard.matches(row) {
                return Ok(Transition::Lost);
            }
            patch.apply(row);
            row.clone()
        };
        self.publish(ChangeEvent::Game(updated.clone()));
        Ok(Transition::Applied(updated))
    }

    async fn upsert_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, StoreError> {
        self.check_available()?;
        let stored = {
            let mut inner = self.inner.write();
            let entry = inner
                .participants
                .entry((participant.game_id, participant.user_id))
                .and_modify(|existing| existing.display_name = participant.display_name.clone())
                .or_insert(participant);
            entry.clone()
        };
        self.publish(ChangeEvent::Participant(stored.clone()));
        Ok(stored)
    }

    async fn load_participants(&self, game_id: GameId) -> Result<Vec<Participant>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<Participant> = self
            .inner
            .read()
            .participants
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then(a.user_id.cmp(&b.user_id))
        });
        Ok(rows)
    }

    async fn accumulate_bet(&self, stake: NewStake) -> Result<BetRow, StoreError> {
        self.check_available()?;
        let stored = {
            let mut inner = self.inner.write();
            let entry = inner
                .bets
                .entry((stake.game_id, stake.user_id, stake.horse_number))
                .or_insert_with(|| BetRow {
                    game_id: stake.game_id,
                    user_id: stake.user_id,
                    horse_number: stake.horse_number,
                    amount: 0.0,
                    chips: 0,
                });
            entry.amount += stake.amount;
            entry.chips += stake.chips;
            entry.clone()
        };
        self.publish(ChangeEvent::Bet(stored.clone()));
        Ok(stored)
    }

    async fn load_bets(&self, game_id: GameId) -> Result<Vec<BetRow>, StoreError> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .bets
            .values()
            .filter(|bet| bet.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn upsert_player_state(
        &self,
        state: PlayerRoundState,
    ) -> Result<PlayerRoundState, StoreError> {
        self.check_available()?;
        self.inner
            .write()
            .player_states
            .insert((state.game_id, state.round, state.user_id), state.clone());
        self.publish(ChangeEvent::PlayerState(state.clone()));
        Ok(state)
    }

    async fn load_player_states(
        &self,
        game_id: GameId,
        round: RoundNumber,
    ) -> Result<Vec<PlayerRoundState>, StoreError> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .player_states
            .range((game_id, round, Uuid::nil())..=(game_id, round, Uuid::from_u128(u128::MAX)))
            .map(|(_, state)| state.clone())
            .collect())
    }
}

impl ChangeFeed for InMemoryGameStore {
    fn subscribe(&self, game_id: GameId) -> FeedSubscription {
        let rx = self
            .feeds
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(self.feed_capacity).0)
            .subscribe();
        FeedSubscription::new(rx)
    }
}
