use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    BetRow, GameId, GameRow, Participant, PlayerRoundState, RoundNumber,
};

use super::entity::{bets, game_participants, games, player_states};
use super::{
    GameFilter, GameGuard, GamePatch, GameStore, NewGame, NewStake, StoreError, Transition,
};

const LOG_TARGET: &str = "store::sea_orm";

/// Postgres-backed store. Conditional updates are single
/// `UPDATE .. WHERE .. RETURNING` statements, so the database serialises
/// racing peers.
pub struct SeaOrmGameStore {
    connection: DatabaseConnection,
}

impl SeaOrmGameStore {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

fn to_i16(value: u8) -> i16 {
    i16::from(value)
}

fn to_i32(column: &'static str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::decode(column, "value exceeds i32"))
}

fn guard_condition(id: GameId, guard: &GameGuard) -> Result<Condition, StoreError> {
    let mut condition = Condition::all().add(games::Column::Id.eq(id));
    if let Some(status) = guard.status {
        condition = condition.add(games::Column::Status.eq(status.as_str()));
    }
    if let Some(round) = guard.current_round {
        condition = condition.add(games::Column::CurrentRound.eq(to_i32("current_round", round)?));
    }
    if let Some(open) = guard.betting_phase {
        condition = condition.add(games::Column::BettingPhase.eq(open));
    }
    if let Some(started) = guard.timer_started {
        condition = condition.add(games::Column::TimerStarted.eq(started));
    }
    if let Some(index) = guard.current_card_index {
        condition = condition.add(
            games::Column::CurrentCardIndex.eq(to_i32("current_card_index", index)?),
        );
    }
    Ok(condition)
}

fn patch_model(patch: &GamePatch) -> Result<games::ActiveModel, StoreError> {
    let mut active = games::ActiveModel::default();
    if let Some(status) = patch.status {
        active.status = Set(status.as_str().to_string());
    }
    if let Some(round) = patch.current_round {
        active.current_round = Set(to_i32("current_round", round)?);
    }
    if let Some(open) = patch.betting_phase {
        active.betting_phase = Set(open);
    }
    if let Some(started) = patch.timer_started {
        active.timer_started = Set(started);
    }
    if let Some(at) = patch.round_started_at {
        active.round_started_at = Set(Some(at));
    }
    if let Some(cards) = &patch.cards_drawn {
        active.cards_drawn = Set(games::encode_cards(cards)?);
    }
    if let Some(index) = patch.current_card_index {
        active.current_card_index = Set(to_i32("current_card_index", index)?);
    }
    if let Some(horse) = patch.winner_horse {
        active.winner_horse = Set(Some(to_i16(horse)));
    }
    if let Some(at) = patch.started_at {
        active.started_at = Set(Some(at));
    }
    if let Some(at) = patch.finished_at {
        active.finished_at = Set(Some(at));
    }
    Ok(active)
}

#[async_trait]
impl GameStore for SeaOrmGameStore {
    async fn insert_game(&self, game: NewGame) -> Result<GameRow, StoreError> {
        let config = game.config;
        let active = games::ActiveModel {
            id: Set(Uuid::new_v4()),
            created_by: Set(game.created_by),
            num_horses: Set(to_i16(config.horse_count)),
            max_players: Set(to_i16(config.max_players)),
            initial_chips: Set(config.initial_chip_price),
            max_bet: Set(config.max_stake),
            prize_distribution: Set(config.prize_distribution.as_str().to_string()),
            entry_fee: Set(to_i32("entry_fee", config.entry_fee)?),
            is_private: Set(config.is_private),
            invite_code: Set(game.invite_code),
            status: Set("waiting".to_string()),
            current_round: Set(0),
            betting_phase: Set(false),
            timer_started: Set(false),
            round_started_at: Set(None),
            cards_drawn: Set(games::encode_cards(&[])?),
            current_card_index: Set(0),
            winner_horse: Set(None),
            created_at: Set(Utc::now()),
            started_at: Set(None),
            finished_at: Set(None),
        };
        let inserted = games::Entity::insert(active)
            .exec_with_returning(&self.connection)
            .await?;
        GameRow::try_from(inserted)
    }

    async fn load_game(&self, id: GameId) -> Result<Option<GameRow>, StoreError> {
        games::Entity::find_by_id(id)
            .one(&self.connection)
            .await?
            .map(GameRow::try_from)
            .transpose()
    }

    async fn find_games(&self, filter: &GameFilter) -> Result<Vec<GameRow>, StoreError> {
        let mut query = games::Entity::find();
        if !filter.statuses.is_empty() {
            query = query.filter(
                games::Column::Status.is_in(filter.statuses.iter().map(|status| status.as_str())),
            );
        }
        if !filter.include_private {
            query = query.filter(games::Column::IsPrivate.eq(false));
        }
        query
            .order_by_desc(games::Column::CreatedAt)
            .all(&self.connection)
            .await?
            .into_iter()
            .map(GameRow::try_from)
            .collect()
    }

    async fn find_game_by_invite(&self, code: &str) -> Result<Option<GameRow>, StoreError> {
        games::Entity::find()
            .filter(games::Column::InviteCode.eq(code))
            .one(&self.connection)
            .await?
            .map(GameRow::try_from)
            .transpose()
    }

    async fn delete_game(&self, id: GameId, guard: &GameGuard) -> Result<bool, StoreError> {
        let condition = guard_condition(id, guard)?;
        let txn = self.connection.begin().await?;
        let deleted = games::Entity::delete_many()
            .filter(condition)
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }
        // child rows also cascade in the schema; explicit deletes keep
        // databases without the foreign keys consistent
        game_participants::Entity::delete_many()
            .filter(game_participants::Column::GameId.eq(id))
            .exec(&txn)
            .await?;
        bets::Entity::delete_many()
            .filter(bets::Column::GameId.eq(id))
            .exec(&txn)
            .await?;
        player_states::Entity::delete_many()
            .filter(player_states::Column::GameId.eq(id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn try_transition(
        &self,
        id: GameId,
        guard: &GameGuard,
        patch: &GamePatch,
    ) -> Result<Transition, StoreError> {
        let mut active = patch_model(patch)?;
        active.id = NotSet;
        let updated = games::Entity::update_many()
            .set(active)
            .filter(guard_condition(id, guard)?)
            .exec_with_returning(&self.connection)
            .await?;

        match updated.into_iter().next() {
            Some(model) => Ok(Transition::Applied(GameRow::try_from(model)?)),
            None => {
                debug!(target: LOG_TARGET, game_id = %id, ?guard, "conditional update matched no row");
                Ok(Transition::Lost)
            }
        }
    }

    async fn upsert_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, StoreError> {
        let active = game_participants::ActiveModel {
            game_id: Set(participant.game_id),
            user_id: Set(participant.user_id),
            display_name: Set(participant.display_name),
            joined_at: Set(participant.joined_at),
        };
        let stored = game_participants::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    game_participants::Column::GameId,
                    game_participants::Column::UserId,
                ])
                .update_column(game_participants::Column::DisplayName)
                .to_owned(),
            )
            .exec_with_returning(&self.connection)
            .await?;
        Ok(stored.into())
    }

    async fn load_participants(&self, game_id: GameId) -> Result<Vec<Participant>, StoreError> {
        let rows = game_participants::Entity::find()
            .filter(game_participants::Column::GameId.eq(game_id))
            .order_by_asc(game_participants::Column::JoinedAt)
            .order_by_asc(game_participants::Column::UserId)
            .all(&self.connection)
            .await?;
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    async fn accumulate_bet(&self, stake: NewStake) -> Result<BetRow, StoreError> {
        let active = bets::ActiveModel {
            game_id: Set(stake.game_id),
            user_id: Set(stake.user_id),
            horse_number: Set(to_i16(stake.horse_number)),
            amount: Set(stake.amount),
            chips: Set(to_i32("chips", stake.chips)?),
        };
        // the addition runs inside the insert, so concurrent purchases on
        // the same record serialise on the row lock
        let stored = bets::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    bets::Column::GameId,
                    bets::Column::UserId,
                    bets::Column::HorseNumber,
                ])
                .value(bets::Column::Amount, Expr::cust("bets.amount + excluded.amount"))
                .value(bets::Column::Chips, Expr::cust("bets.chips + excluded.chips"))
                .to_owned(),
            )
            .exec_with_returning(&self.connection)
            .await?;
        BetRow::try_from(stored)
    }

    async fn load_bets(&self, game_id: GameId) -> Result<Vec<BetRow>, StoreError> {
        bets::Entity::find()
            .filter(bets::Column::GameId.eq(game_id))
            .order_by_asc(bets::Column::UserId)
            .order_by_asc(bets::Column::HorseNumber)
            .all(&self.connection)
            .await?
            .into_iter()
            .map(BetRow::try_from)
            .collect()
    }

    async fn upsert_player_state(
        &self,
        state: PlayerRoundState,
    ) -> Result<PlayerRoundState, StoreError> {
        let active = player_states::ActiveModel {
            game_id: Set(state.game_id),
            user_id: Set(state.user_id),
            round_number: Set(to_i32("round_number", state.round)?),
            betting_window_closed: Set(state.betting_window_closed),
            closed_at: Set(state.closed_at),
        };
        let stored = player_states::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    player_states::Column::GameId,
                    player_states::Column::UserId,
                    player_states::Column::RoundNumber,
                ])
                .update_columns([
                    player_states::Column::BettingWindowClosed,
                    player_states::Column::ClosedAt,
                ])
                .to_owned(),
            )
            .exec_with_returning(&self.connection)
            .await?;
        PlayerRoundState::try_from(stored)
    }

    async fn load_player_states(
        &self,
        game_id: GameId,
        round: RoundNumber,
    ) -> Result<Vec<PlayerRoundState>, StoreError> {
        player_states::Entity::find()
            .filter(player_states::Column::GameId.eq(game_id))
            .filter(player_states::Column::RoundNumber.eq(to_i32("round_number", round)?))
            .all(&self.connection)
            .await?
            .into_iter()
            .map(PlayerRoundState::try_from)
            .collect()
    }
}
