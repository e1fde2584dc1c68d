//! Exactly-once card draw.
//!
//! Any peer may attempt the draw once the window should close. The write is
//! guarded on the round, the open betting phase and the deck cursor, so only
//! one attempt per round lands and the cursor only moves forward.

use tracing::{debug, info};

use crate::deck::{Deck, DrawnCard};
use crate::domain::{GameId, GameRow, GameStatus, CARDS_PER_ROUND};
use crate::store::{GameGuard, GamePatch, GameStore, StoreError, Transition};

const LOG_TARGET: &str = "game::draw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSkip {
    /// The window was already closed by someone else, or the game is not running.
    NotOpen,
    /// Another peer's draw landed between our read and our write.
    Lost,
    DeckExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome {
    Drawn(GameRow),
    Skipped(DrawSkip),
}

impl DrawOutcome {
    pub fn drawn(self) -> Option<GameRow> {
        match self {
            DrawOutcome::Drawn(row) => Some(row),
            DrawOutcome::Skipped(_) => None,
        }
    }
}

/// Up to five cards from `cursor`, each tagged with the horse it moves.
pub fn cards_for_round(deck: &Deck, cursor: u32) -> Vec<DrawnCard> {
    deck.slice(cursor, CARDS_PER_ROUND)
        .iter()
        .copied()
        .map(DrawnCard::from)
        .collect()
}

pub async fn try_draw(
    store: &dyn GameStore,
    game_id: GameId,
    deck: &Deck,
) -> Result<DrawOutcome, StoreError> {
    let Some(game) = store.load_game(game_id).await? else {
        return Ok(DrawOutcome::Skipped(DrawSkip::NotOpen));
    };
    if !game.betting_open() {
        return Ok(DrawOutcome::Skipped(DrawSkip::NotOpen));
    }

    let cards = cards_for_round(deck, game.current_card_index);
    if cards.is_empty() {
        return Ok(DrawOutcome::Skipped(DrawSkip::DeckExhausted));
    }
    let drawn = u32::try_from(cards.len()).unwrap_or(0);
    let next_index = game.current_card_index + drawn;

    let guard = GameGuard::new()
        .status(GameStatus::Running)
        .round(game.current_round)
        .betting_phase(true)
        .card_index(game.current_card_index);
    let patch = GamePatch::new()
        .betting_phase(false)
        .cards_drawn(cards)
        .card_index(next_index);

    match store.try_transition(game_id, &guard, &patch).await? {
        Transition::Applied(row) => {
            info!(
                target: LOG_TARGET,
                game_id = %game_id,
                round = row.current_round,
                card_index = row.current_card_index,
                "cards drawn"
            );
            Ok(DrawOutcome::Drawn(row))
        }
        Transition::Lost => {
            debug!(target: LOG_TARGET, game_id = %game_id, round = game.current_round, "draw lost");
            Ok(DrawOutcome::Skipped(DrawSkip::Lost))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{GameConfig, PeerIdentity};
    use crate::game::round::{advance_round, start_game};
    use crate::test_utils::fixtures;

    async fn running() -> anyhow::Result<(Arc<crate::store::InMemoryGameStore>, GameRow, Deck)> {
        let creator = PeerIdentity::random("creator");
        let guest = PeerIdentity::random("guest");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator, &guest]).await?;
        let game = start_game(store.as_ref(), game.id, creator.user_id).await?;
        let deck = Deck::for_game(&game.id, game.config.horse_count)?;
        Ok((store, game, deck))
    }

    #[tokio::test]
    async fn concurrent_draws_land_once() -> anyhow::Result<()> {
        let (store, game, deck) = running().await?;
        let deck = Arc::new(deck);

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let deck = Arc::clone(&deck);
            let game_id = game.id;
            tasks.push(tokio::spawn(async move {
                try_draw(store.as_ref(), game_id, &deck).await
            }));
        }
        let mut drawn = Vec::new();
        for task in tasks {
            if let DrawOutcome::Drawn(row) = task.await?? {
                drawn.push(row);
            }
        }
        assert_eq!(drawn.len(), 1);

        let row = store.load_game(game.id).await?.expect("game exists");
        assert_eq!(row.current_card_index, 5);
        assert!(row.round_drawn());
        assert_eq!(row.cards_drawn, cards_for_round(&deck, 0));
        Ok(())
    }

    #[tokio::test]
    async fn card_index_only_moves_forward() -> anyhow::Result<()> {
        let (store, game, deck) = running().await?;
        let mut last = 0;
        for round in 1..=8 {
            let row = try_draw(store.as_ref(), game.id, &deck)
                .await?
                .drawn()
                .expect("draw lands on an open round");
            assert_eq!(row.current_round, round);
            assert!(row.current_card_index > last);
            last = row.current_card_index;

            assert_eq!(
                try_draw(store.as_ref(), game.id, &deck).await?,
                DrawOutcome::Skipped(DrawSkip::NotOpen)
            );
            if round < 8 {
                assert!(advance_round(store.as_ref(), &row).await?.is_applied());
            }
        }
        assert_eq!(last, 40);
        Ok(())
    }

    #[tokio::test]
    async fn waiting_games_cannot_draw() -> anyhow::Result<()> {
        let creator = PeerIdentity::random("creator");
        let (store, game) =
            fixtures::seeded_store(GameConfig::default(), &creator, &[&creator]).await?;
        let deck = Deck::for_game(&game.id, 4)?;
        assert_eq!(
            try_draw(store.as_ref(), game.id, &deck).await?,
            DrawOutcome::Skipped(DrawSkip::NotOpen)
        );
        Ok(())
    }
}
