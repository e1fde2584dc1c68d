//! Betting windows and stake purchases.
//!
//! Round 1 opens without a timer; the first stake flips `timer_started`
//! through a conditional write, and every peer that sees the flag runs its
//! own countdown. Later rounds start counting as soon as they open.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::domain::{
    BetRow, GameId, GameRow, GameStatus, HorseNumber, PlayerRoundState, RoundNumber, UserId,
};
use crate::race::Track;
use crate::store::{GameGuard, GamePatch, GameStore, NewStake, StoreError, Transition};

use super::error::StakeError;

pub const MAX_HORSES_PER_PLAYER: usize = 3;
pub const MAX_CHIPS_PER_PURCHASE: u32 = 50;
/// Horses at or beyond this position no longer take stakes.
pub const STAKE_CUTOFF_POSITION: u8 = 8;

/// Chip price for a horse at `position`: the further ahead, the dearer.
pub fn chip_price(base: f64, position: u8) -> f64 {
    let multiplier = match position {
        0..=3 => 1.0,
        4..=6 => 1.5,
        7..=8 => 2.0,
        _ => 3.0,
    };
    round_cents(base * multiplier)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeRequest {
    pub horse_number: HorseNumber,
    pub chips: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeQuote {
    pub horse_number: HorseNumber,
    pub chips: u32,
    pub chip_price: f64,
    pub amount: f64,
    pub round: RoundNumber,
}

/// What a peer knows about itself when pricing a purchase.
#[derive(Debug, Clone, Copy)]
pub struct StakeContext<'a> {
    pub game: &'a GameRow,
    pub track: &'a Track,
    pub own_bets: &'a [BetRow],
    pub spent_this_window: f64,
    pub own_window_closed: bool,
}

pub fn quote_stake(ctx: &StakeContext<'_>, request: StakeRequest) -> Result<StakeQuote, StakeError> {
    let game = ctx.game;
    if game.status == GameStatus::Finished {
        return Err(StakeError::RaceFinished);
    }
    if !game.betting_open() {
        return Err(StakeError::WindowClosed);
    }
    if ctx.own_window_closed {
        return Err(StakeError::OwnWindowClosed(game.current_round));
    }
    if !(1..=MAX_CHIPS_PER_PURCHASE).contains(&request.chips) {
        return Err(StakeError::InvalidChips {
            chips: request.chips,
        });
    }

    let horse = ctx
        .track
        .horse(request.horse_number)
        .ok_or(StakeError::UnknownHorse(request.horse_number))?;
    if horse.position >= STAKE_CUTOFF_POSITION {
        return Err(StakeError::HorseTooFarAhead {
            horse: horse.number,
            position: horse.position,
            limit: STAKE_CUTOFF_POSITION,
        });
    }

    let backed: BTreeSet<HorseNumber> = ctx
        .own_bets
        .iter()
        .filter(|bet| bet.amount > 0.0)
        .map(|bet| bet.horse_number)
        .collect();
    if !backed.contains(&request.horse_number) && backed.len() >= MAX_HORSES_PER_PLAYER {
        return Err(StakeError::TooManyHorses {
            limit: MAX_HORSES_PER_PLAYER,
        });
    }

    let price = chip_price(game.config.initial_chip_price, horse.position);
    let amount = round_cents(price * f64::from(request.chips));
    let total = round_cents(ctx.spent_this_window + amount);
    if total > game.config.max_stake + 1e-9 {
        return Err(StakeError::WindowLimitExceeded {
            total,
            limit: game.config.max_stake,
        });
    }

    Ok(StakeQuote {
        horse_number: request.horse_number,
        chips: request.chips,
        chip_price: price,
        amount,
        round: game.current_round,
    })
}

pub async fn place_stake(
    store: &dyn GameStore,
    game_id: GameId,
    user_id: UserId,
    quote: &StakeQuote,
) -> Result<BetRow, StoreError> {
    store
        .accumulate_bet(NewStake {
            game_id,
            user_id,
            horse_number: quote.horse_number,
            amount: quote.amount,
            chips: quote.chips,
        })
        .await
}

/// First-stake trigger for round 1. Exactly one caller gets `Applied`.
pub async fn trigger_round_timer(
    store: &dyn GameStore,
    game_id: GameId,
) -> Result<Transition, StoreError> {
    let guard = GameGuard::new()
        .status(GameStatus::Running)
        .round(1)
        .betting_phase(true)
        .timer_started(false);
    store
        .try_transition(game_id, &guard, &GamePatch::new().timer_started(true))
        .await
}

/// Whether a peer observing `game` should be running a countdown.
pub fn countdown_due(game: &GameRow) -> bool {
    game.betting_open() && (game.current_round >= 2 || game.timer_started)
}

pub async fn close_window(
    store: &dyn GameStore,
    game_id: GameId,
    user_id: UserId,
    round: RoundNumber,
) -> Result<PlayerRoundState, StoreError> {
    store
        .upsert_player_state(PlayerRoundState {
            game_id,
            user_id,
            round,
            betting_window_closed: true,
            closed_at: Some(Utc::now()),
        })
        .await
}

/// Every registered participant closed `round`.
pub async fn all_windows_closed(
    store: &dyn GameStore,
    game_id: GameId,
    round: RoundNumber,
) -> Result<bool, StoreError> {
    let participants = store.load_participants(game_id).await?;
    if participants.is_empty() {
        return Ok(false);
    }
    let closed = store
        .load_player_states(game_id, round)
        .await?
        .iter()
        .filter(|state| state.betting_window_closed)
        .count();
    Ok(closed >= participants.len())
}
