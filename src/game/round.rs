//! Round life cycle: `waiting → running (rounds 1..=MAX_ROUNDS) → finished`.
//!
//! Every step here is a single guarded write. Peers call these redundantly;
//! whoever loses the race gets [`Transition::Lost`] and moves on.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::deck::Deck;
use crate::domain::{
    GameId, GameRow, GameStatus, RoundNumber, UserId, MAX_ROUNDS, MIN_PARTICIPANTS_TO_START,
};
use crate::race::Track;
use crate::store::{GameGuard, GamePatch, GameStore, StoreError, Transition};

use super::error::SessionError;

const LOG_TARGET: &str = "game::round";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoundPhase {
    #[default]
    Waiting,
    BettingOpen {
        round: RoundNumber,
    },
    Drawn {
        round: RoundNumber,
    },
    Finished,
}

impl RoundPhase {
    pub fn of(game: &GameRow) -> Self {
        match game.status {
            GameStatus::Waiting => RoundPhase::Waiting,
            GameStatus::Finished => RoundPhase::Finished,
            GameStatus::Running if game.betting_open() => RoundPhase::BettingOpen {
                round: game.current_round,
            },
            GameStatus::Running => RoundPhase::Drawn {
                round: game.current_round,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    PodiumFilled,
    DeckExhausted,
    RoundLimit,
}

/// What follows a drawn round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStep {
    Advance { next_round: RoundNumber },
    Finish(FinishReason),
}

/// Decides the step after the drawn round in `game`. `track` must already be
/// replayed up to `game.current_card_index`. The round cap is the same for
/// every peer, so all of them reach the same decision.
pub fn next_step(game: &GameRow, track: &Track, deck: &Deck) -> RoundStep {
    let paid = game.config.prize_distribution.paid_positions();
    if track.podium_filled(paid) {
        RoundStep::Finish(FinishReason::PodiumFilled)
    } else if !deck.can_deal_round(game.current_card_index) {
        RoundStep::Finish(FinishReason::DeckExhausted)
    } else if game.current_round >= MAX_ROUNDS {
        RoundStep::Finish(FinishReason::RoundLimit)
    } else {
        RoundStep::Advance {
            next_round: game.current_round + 1,
        }
    }
}

/// Creator-only `waiting → running`. Opens round 1 in the same write.
pub async fn start_game(
    store: &dyn GameStore,
    game_id: GameId,
    requester: UserId,
) -> Result<GameRow, SessionError> {
    let game = store
        .load_game(game_id)
        .await?
        .ok_or(SessionError::NotFound("game"))?;
    if !game.is_creator(requester) {
        return Err(SessionError::NotCreator("start the race"));
    }
    if game.status != GameStatus::Waiting {
        return Err(SessionError::WrongStatus(game.status));
    }
    let found = store.load_participants(game_id).await?.len();
    if found < MIN_PARTICIPANTS_TO_START {
        return Err(SessionError::NotEnoughPlayers {
            required: MIN_PARTICIPANTS_TO_START,
            found,
        });
    }

    let now = Utc::now();
    let patch = GamePatch::new()
        .status(GameStatus::Running)
        .round(1)
        .betting_phase(true)
        .timer_started(false)
        .cards_drawn(Vec::new())
        .card_index(0)
        .round_started_at(now)
        .started_at(now);
    let guard = GameGuard::new().status(GameStatus::Waiting);

    match store.try_transition(game_id, &guard, &patch).await? {
        Transition::Applied(row) => {
            info!(target: LOG_TARGET, game_id = %game_id, players = found, "race started");
            Ok(row)
        }
        Transition::Lost => {
            // A second tab of the creator may have started it already.
            let current = store
                .load_game(game_id)
                .await?
                .ok_or(SessionError::NotFound("game"))?;
            if current.status == GameStatus::Running {
                Ok(current)
            } else {
                Err(SessionError::Conflict)
            }
        }
    }
}

/// Opens round `r + 1` after the drawn round `r` held in `game`.
pub async fn advance_round(
    store: &dyn GameStore,
    game: &GameRow,
) -> Result<Transition, StoreError> {
    let guard = GameGuard::new()
        .status(GameStatus::Running)
        .round(game.current_round)
        .betting_phase(false)
        .card_index(game.current_card_index);
    let patch = GamePatch::new()
        .round(game.current_round + 1)
        .betting_phase(true)
        .cards_drawn(Vec::new())
        .round_started_at(Utc::now());
    let outcome = store.try_transition(game.id, &guard, &patch).await?;
    match &outcome {
        Transition::Applied(row) => {
            info!(target: LOG_TARGET, game_id = %game.id, round = row.current_round, "round opened")
        }
        Transition::Lost => {
            debug!(target: LOG_TARGET, game_id = %game.id, round = game.current_round, "advance already done")
        }
    }
    Ok(outcome)
}

/// `running → finished` after the drawn round held in `game`. Pinned to that
/// round and card index, so a peer holding an older row cannot finish a race
/// that has already moved on.
pub async fn finish_race(
    store: &dyn GameStore,
    game: &GameRow,
    track: &Track,
) -> Result<Transition, StoreError> {
    let guard = GameGuard::new()
        .status(GameStatus::Running)
        .round(game.current_round)
        .betting_phase(false)
        .card_index(game.current_card_index);
    declare_finish(store, game, track, &guard).await
}

/// `running → finished` for an open round the deck can no longer deal.
pub async fn finish_undealt_round(
    store: &dyn GameStore,
    game: &GameRow,
    track: &Track,
) -> Result<Transition, StoreError> {
    let guard = GameGuard::new()
        .status(GameStatus::Running)
        .round(game.current_round)
        .card_index(game.current_card_index);
    declare_finish(store, game, track, &guard).await
}

/// Records the top-ranked horse as winner only if it crossed the line.
async fn declare_finish(
    store: &dyn GameStore,
    game: &GameRow,
    track: &Track,
    guard: &GameGuard,
) -> Result<Transition, StoreError> {
    let mut patch = GamePatch::new()
        .status(GameStatus::Finished)
        .betting_phase(false)
        .finished_at(Utc::now());
    if let Some(leader) = track.ranking().first().filter(|horse| horse.is_finished()) {
        patch = patch.winner_horse(leader.number);
    }
    let outcome = store.try_transition(game.id, guard, &patch).await?;
    match &outcome {
        Transition::Applied(row) => info!(
            target: LOG_TARGET,
            game_id = %game.id,
            winner = ?row.winner_horse,
            rounds = row.current_round,
            "race finished"
        ),
        Transition::Lost => {
            debug!(target: LOG_TARGET, game_id = %game.id, "finish already declared")
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{GameConfig, PeerIdentity, PrizeDistribution};
    use crate::test_utils::fixtures;

    fn drawn_game(round: RoundNumber, card_index: u32) -> GameRow {
        let mut game = fixtures::running_game(GameConfig::default());
        game.current_round = round;
        game.betting_phase = false;
        game.cards_drawn = fixtures::some_cards();
        game.current_card_index = card_index;
        game
    }

    #[test]
    fn phase_follows_the_row() {
        let mut game = fixtures::waiting_game(GameConfig::default());
        assert_eq!(RoundPhase::of(&game), RoundPhase::Waiting);

        game = fixtures::running_game(GameConfig::default());
        assert_eq!(RoundPhase::of(&game), RoundPhase::BettingOpen { round: 1 });

        game = drawn_game(3, 15);
        assert_eq!(RoundPhase::of(&game), RoundPhase::Drawn { round: 3 });

        game.status = GameStatus::Finished;
        assert_eq!(RoundPhase::of(&game), RoundPhase::Finished);
    }

    #[test]
    fn next_step_advances_while_cards_remain() {
        let game = drawn_game(2, 10);
        let deck = Deck::for_game(&game.id, 4).unwrap();
        let track = Track::new(4);
        assert_eq!(
            next_step(&game, &track, &deck),
            RoundStep::Advance { next_round: 3 }
        );
    }

    #[test]
    fn deck_exhaustion_after_round_eight_finishes() {
        let game = drawn_game(8, 40);
        let deck = Deck::for_game(&game.id, 4).unwrap();
        let mut track = Track::new(4);
        for number in 1..=4 {
            track.place(number, 5);
        }
        assert_eq!(
            next_step(&game, &track, &deck),
            RoundStep::Finish(FinishReason::DeckExhausted)
        );
    }

    #[test]
    fn round_cap_applies_with_a_larger_deck() {
        let mut game = drawn_game(8, 40);
        game.config.horse_count = 6;
        let deck = Deck::for_game(&game.id, 6).unwrap();
        let track = Track::new(6);
        assert_eq!(
            next_step(&game, &track, &deck),
            RoundStep::Finish(FinishReason::RoundLimit)
        );
    }

    #[test]
    fn podium_is_checked_before_exhaustion() {
        let mut game = drawn_game(8, 40);
        game.config.prize_distribution = PrizeDistribution::Top2;
        game.config.horse_count = 5;
        let deck = Deck::for_game(&game.id, 5).unwrap();
        let mut track = Track::new(5);
        track.place(1, 11);
        assert_ne!(
            next_step(&game, &track, &deck),
            RoundStep::Finish(FinishReason::PodiumFilled)
        );
        track.place(4, 12);
        assert_eq!(
            next_step(&game, &track, &deck),
            RoundStep::Finish(FinishReason::PodiumFilled)
        );
    }

    #[tokio::test]
    async fn start_requires_creator_and_two_players() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator]).await?;

        let err = start_game(store.as_ref(), game.id, guest.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotCreator(_)));

        let err = start_game(store.as_ref(), game.id, creator.user_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotEnoughPlayers {
                required: 2,
                found: 1
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn start_opens_round_one_without_a_timer() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator, &guest]).await?;

        let row = start_game(store.as_ref(), game.id, creator.user_id).await?;
        assert_eq!(row.status, GameStatus::Running);
        assert_eq!(row.current_round, 1);
        assert!(row.betting_open());
        assert!(!row.timer_started);
        assert!(row.started_at.is_some());

        // A second start sees the race already running.
        let again = start_game(store.as_ref(), game.id, creator.user_id).await;
        assert!(matches!(again, Err(SessionError::WrongStatus(GameStatus::Running))));
        Ok(())
    }

    #[tokio::test]
    async fn advance_and_finish_apply_once() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator, &guest]).await?;
        start_game(store.as_ref(), game.id, creator.user_id).await?;
        let drawn = store
            .try_transition(
                game.id,
                &GameGuard::new().betting_phase(true),
                &GamePatch::new()
                    .betting_phase(false)
                    .cards_drawn(fixtures::some_cards())
                    .card_index(5),
            )
            .await?
            .applied()
            .expect("draw applies");

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let store = Arc::clone(&store);
            let drawn = drawn.clone();
            tasks.push(tokio::spawn(async move {
                advance_round(store.as_ref(), &drawn).await
            }));
        }
        let mut applied = 0;
        for task in tasks {
            if task.await??.is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let opened = store.load_game(game.id).await?.expect("game exists");
        assert_eq!(opened.current_round, 2);
        assert!(opened.betting_open());
        assert_eq!(opened.current_card_index, 5);

        // A peer still holding the round-1 row cannot end the race.
        let track = Track::new(4);
        assert_eq!(
            finish_race(store.as_ref(), &drawn, &track).await?,
            Transition::Lost
        );
        let still = store.load_game(game.id).await?.expect("game exists");
        assert_eq!(still.status, GameStatus::Running);
        assert_eq!(still.current_round, 2);

        let second = store
            .try_transition(
                game.id,
                &GameGuard::new().round(2).betting_phase(true),
                &GamePatch::new()
                    .betting_phase(false)
                    .cards_drawn(fixtures::some_cards())
                    .card_index(10),
            )
            .await?
            .applied()
            .expect("second draw applies");
        assert!(finish_race(store.as_ref(), &second, &track)
            .await?
            .is_applied());
        assert_eq!(
            finish_race(store.as_ref(), &second, &track).await?,
            Transition::Lost
        );
        let finished = store.load_game(game.id).await?.expect("game exists");
        assert_eq!(finished.status, GameStatus::Finished);
        assert_eq!(finished.current_round, 2);
        // nobody crossed the line
        assert_eq!(finished.winner_horse, None);
        Ok(())
    }

    #[tokio::test]
    async fn winner_is_recorded_once_a_horse_is_home() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator, &guest]).await?;
        start_game(store.as_ref(), game.id, creator.user_id).await?;
        let drawn = store
            .try_transition(
                game.id,
                &GameGuard::new().betting_phase(true),
                &GamePatch::new()
                    .betting_phase(false)
                    .cards_drawn(fixtures::some_cards())
                    .card_index(5),
            )
            .await?
            .applied()
            .expect("draw applies");

        let mut track = Track::new(4);
        track.place(2, 9);
        track.place(3, 12);
        let row = finish_race(store.as_ref(), &drawn, &track)
            .await?
            .applied()
            .expect("finish applies");
        assert_eq!(row.winner_horse, Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn undealt_round_finishes_only_from_the_open_round() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator, &guest]).await?;
        let open = start_game(store.as_ref(), game.id, creator.user_id).await?;

        let mut stale = open.clone();
        stale.current_round = 3;
        let track = Track::new(4);
        assert_eq!(
            finish_undealt_round(store.as_ref(), &stale, &track).await?,
            Transition::Lost
        );
        assert!(finish_undealt_round(store.as_ref(), &open, &track)
            .await?
            .is_applied());
        Ok(())
    }
}
