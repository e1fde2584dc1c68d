//! Deterministic per-game deck.
//!
//! Every peer derives the same card order from the game id alone, so nobody
//! has to publish or agree on a shuffle. The seed is the first eight hex
//! digits of the id; the shuffle is an explicit Fisher-Yates over
//! `ChaCha8Rng`, whose output is fixed across `rand` releases.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::domain::{GameId, CARDS_PER_ROUND};

mod card;

pub use card::{Card, DrawnCard, Rank, Suit};

pub const RANKS_PER_SUIT: usize = Rank::ALL.len();
const SEED_NIBBLES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeckError {
    #[error("game id `{0}` does not start with {n} hex digits", n = SEED_NIBBLES)]
    MalformedGameId(String),
    #[error("a deck holds between 1 and {max} suits, requested {0}", max = Suit::ALL.len())]
    SuitCount(u8),
}

/// Seed from the textual game id: dashes stripped, first eight hex nibbles
/// read as a big-endian `u32`.
pub fn seed_from_game_ref(id: &str) -> Result<u32, DeckError> {
    let nibbles: String = id.chars().filter(|c| *c != '-').take(SEED_NIBBLES).collect();
    if nibbles.len() != SEED_NIBBLES || !nibbles.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DeckError::MalformedGameId(id.to_string()));
    }
    u32::from_str_radix(&nibbles, 16).map_err(|_| DeckError::MalformedGameId(id.to_string()))
}

pub fn seed_for_game(id: &GameId) -> u32 {
    let bytes = id.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deck {
    seed: u32,
    cards: Vec<Card>,
}

impl Deck {
    pub fn for_game(id: &GameId, horse_count: u8) -> Result<Self, DeckError> {
        Self::from_seed(seed_for_game(id), horse_count)
    }

    pub fn from_seed(seed: u32, horse_count: u8) -> Result<Self, DeckError> {
        let suits = usize::from(horse_count);
        if suits == 0 || suits > Suit::ALL.len() {
            return Err(DeckError::SuitCount(horse_count));
        }

        let mut cards: Vec<Card> = Suit::ALL[..suits]
            .iter()
            .flat_map(|suit| Rank::ALL.iter().map(move |rank| Card::new(*suit, *rank)))
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(seed));
        for i in (1..cards.len()).rev() {
            let j = (rng.next_u64() % (i as u64 + 1)) as usize;
            cards.swap(i, j);
        }

        Ok(Self { seed, cards })
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Up to `count` cards starting at `cursor`; shorter near the end.
    pub fn slice(&self, cursor: u32, count: usize) -> &[Card] {
        let start = (cursor as usize).min(self.cards.len());
        let end = start.saturating_add(count).min(self.cards.len());
        &self.cards[start..end]
    }

    pub fn remaining(&self, cursor: u32) -> usize {
        self.cards.len().saturating_sub(cursor as usize)
    }

    /// Whether another full round can be dealt from `cursor`.
    pub fn can_deal_round(&self, cursor: u32) -> bool {
        self.remaining(cursor) >= CARDS_PER_ROUND
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use uuid::Uuid;

    use super::*;

    const GAME: &str = "3f2a9c01-7b44-4d2e-9a55-0c1d2e3f4a5b";

    #[test]
    fn seed_uses_leading_nibbles() {
        assert_eq!(seed_from_game_ref(GAME), Ok(0x3f2a_9c01));
        assert_eq!(seed_from_game_ref("0000-00ff-rest"), Ok(0xff));
        let id = Uuid::parse_str(GAME).unwrap();
        assert_eq!(seed_for_game(&id), 0x3f2a_9c01);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for bad in ["", "abc", "zz2a9c01-0000", "3f2a-9c0"] {
            assert_eq!(
                seed_from_game_ref(bad),
                Err(DeckError::MalformedGameId(bad.to_string())),
                "input {bad:?}"
            );
        }
    }

    #[test]
    fn same_game_same_order() {
        let id = Uuid::parse_str(GAME).unwrap();
        let first = Deck::for_game(&id, 4).unwrap();
        let second = Deck::for_game(&id, 4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn four_horses_use_the_forty_card_deck() {
        let deck = Deck::from_seed(7, 4).unwrap();
        assert_eq!(deck.len(), 40);

        let unique: HashSet<Card> = deck.cards().iter().copied().collect();
        assert_eq!(unique.len(), 40);
        assert!(deck.cards().iter().all(|card| !card.suit.is_sicilian()));
    }

    #[test]
    fn deck_size_follows_horse_count() {
        for horses in 4..=8u8 {
            let deck = Deck::from_seed(99, horses).unwrap();
            assert_eq!(deck.len(), RANKS_PER_SUIT * usize::from(horses));
            assert!(deck
                .cards()
                .iter()
                .all(|card| card.horse_number() <= horses));
        }
        assert_eq!(Deck::from_seed(1, 0), Err(DeckError::SuitCount(0)));
        assert_eq!(Deck::from_seed(1, 9), Err(DeckError::SuitCount(9)));
    }

    #[test]
    fn different_seeds_shuffle_differently() {
        let a = Deck::from_seed(1, 4).unwrap();
        let b = Deck::from_seed(2, 4).unwrap();
        assert_ne!(a.cards(), b.cards());
    }

    #[test]
    fn slices_clamp_at_the_end() {
        let deck = Deck::from_seed(5, 4).unwrap();
        assert_eq!(deck.slice(0, 5).len(), 5);
        assert_eq!(deck.slice(38, 5).len(), 2);
        assert!(deck.slice(40, 5).is_empty());
        assert!(deck.slice(400, 5).is_empty());
        assert!(deck.can_deal_round(35));
        assert!(!deck.can_deal_round(36));
    }
}
