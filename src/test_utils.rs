//! Shared helpers for unit and scenario tests.

/// Serde round-trip assertions for rows that travel through the feed.
pub mod serde {
    use std::fmt::Debug;

    /// Assert that a value survives a serde_json round-trip using structural equality.
    pub fn assert_round_trip_eq<T>(value: &T)
    where
        T: ::serde::Serialize + ::serde::de::DeserializeOwned + PartialEq + Debug,
    {
        let json = serde_json::to_string(value)
            .expect("serialization should succeed during round-trip testing");
        let restored: T = serde_json::from_str(&json)
            .expect("deserialization should succeed during round-trip testing");
        assert_eq!(restored, *value, "serde_json round-trip altered the value");
    }

    /// Assert that serde_json emits the same payload before and after round-tripping.
    pub fn assert_round_trip_json<T>(value: &T)
    where
        T: ::serde::Serialize + ::serde::de::DeserializeOwned,
    {
        let json = serde_json::to_value(value)
            .expect("serialization to value should succeed during round-trip testing");
        let restored: T = serde_json::from_value(json.clone())
            .expect("deserialization from value should succeed during round-trip testing");
        let json_after = serde_json::to_value(restored)
            .expect("re-serialization should succeed during round-trip testing");
        assert_eq!(json_after, json, "serde_json round-trip altered the payload");
    }
}

/// Ready-made rows and stores.
pub mod fixtures {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::deck::{Card, DrawnCard, Rank, Suit};
    use crate::domain::{GameConfig, GameRow, GameStatus, Participant, PeerIdentity};
    use crate::store::{GameStore, InMemoryGameStore, NewGame};

    pub fn waiting_game(config: GameConfig) -> GameRow {
        GameRow {
            id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            config,
            invite_code: None,
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
        }
    }

    /// Round 1 open, timer not yet triggered.
    pub fn running_game(config: GameConfig) -> GameRow {
        let now = Utc::now();
        GameRow {
            status: GameStatus::Running,
            current_round: 1,
            betting_phase: true,
            round_started_at: Some(now),
            started_at: Some(now),
            ..waiting_game(config)
        }
    }

    pub fn some_cards() -> Vec<DrawnCard> {
        [
            Card::new(Suit::Cups, Rank::King),
            Card::new(Suit::Coins, Rank::Ace),
            Card::new(Suit::Swords, Rank::Four),
            Card::new(Suit::Clubs, Rank::Knight),
            Card::new(Suit::Cups, Rank::Two),
        ]
        .into_iter()
        .map(DrawnCard::from)
        .collect()
    }

    /// In-memory store holding one waiting game created by `creator`, with
    /// every identity in `players` (creator included) registered.
    pub async fn seeded_store(
        config: GameConfig,
        creator: &PeerIdentity,
        players: &[&PeerIdentity],
    ) -> anyhow::Result<(Arc<InMemoryGameStore>, GameRow)> {
        let store = Arc::new(InMemoryGameStore::new());
        let game = store
            .insert_game(NewGame {
                created_by: creator.user_id,
                config,
                invite_code: None,
            })
            .await?;
        for player in players {
            store
                .upsert_participant(Participant {
                    game_id: game.id,
                    user_id: player.user_id,
                    display_name: player.display_name.clone(),
                    joined_at: Utc::now(),
                })
                .await?;
        }
        Ok((store, game))
    }
}
