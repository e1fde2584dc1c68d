use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::HorseNumber;

/// One suit per horse. The first four are the Neapolitan suits, the last four
/// the Sicilian variants used once a game runs more than four horses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suit {
    Cups,
    Coins,
    Swords,
    Clubs,
    SicilianCups,
    SicilianCoins,
    SicilianSwords,
    SicilianClubs,
}

impl Suit {
    pub const ALL: [Suit; 8] = [
        Suit::Cups,
        Suit::Coins,
        Suit::Swords,
        Suit::Clubs,
        Suit::SicilianCups,
        Suit::SicilianCoins,
        Suit::SicilianSwords,
        Suit::SicilianClubs,
    ];

    /// Suit of horse `number` (1-based), if such a horse can exist.
    pub fn for_horse(number: HorseNumber) -> Option<Suit> {
        let index = usize::from(number).checked_sub(1)?;
        Suit::ALL.get(index).copied()
    }

    pub fn horse_number(self) -> HorseNumber {
        match self {
            Suit::Cups => 1,
            Suit::Coins => 2,
            Suit::Swords => 3,
            Suit::Clubs => 4,
            Suit::SicilianCups => 5,
            Suit::SicilianCoins => 6,
            Suit::SicilianSwords => 7,
            Suit::SicilianClubs => 8,
        }
    }

    pub fn is_sicilian(self) -> bool {
        matches!(
            self,
            Suit::SicilianCups | Suit::SicilianCoins | Suit::SicilianSwords | Suit::SicilianClubs
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Suit::Cups => "Cups",
            Suit::Coins => "Coins",
            Suit::Swords => "Swords",
            Suit::Clubs => "Clubs",
            Suit::SicilianCups => "Sicilian Cups",
            Suit::SicilianCoins => "Sicilian Coins",
            Suit::SicilianSwords => "Sicilian Swords",
            Suit::SicilianClubs => "Sicilian Clubs",
        }
    }

    /// Racing colour of the horse running on this suit.
    pub fn colour(self) -> &'static str {
        match self {
            Suit::Cups => "red",
            Suit::Coins => "gold",
            Suit::Swords => "blue",
            Suit::Clubs => "green",
            Suit::SicilianCups => "purple",
            Suit::SicilianCoins => "orange",
            Suit::SicilianSwords => "cyan",
            Suit::SicilianClubs => "brown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Jack,
    Knight,
    King,
}

impl Rank {
    pub const ALL: [Rank; 10] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Jack,
        Rank::Knight,
        Rank::King,
    ];

    /// Steps the horse of this card's suit moves: the ace pulls it back, pips
    /// push it one step, court cards three.
    pub fn movement(self) -> i8 {
        match self {
            Rank::Ace => -1,
            Rank::Two | Rank::Three | Rank::Four | Rank::Five | Rank::Six | Rank::Seven => 1,
            Rank::Jack | Rank::Knight | Rank::King => 3,
        }
    }

    /// Face label. Sicilian decks print a queen where the Neapolitan jack is.
    pub fn label(self, suit: Suit) -> &'static str {
        match self {
            Rank::Ace => "Ace",
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Jack if suit.is_sicilian() => "Donna",
            Rank::Jack => "Jack",
            Rank::Knight => "Knight",
            Rank::King => "King",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub const fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }

    pub fn horse_number(&self) -> HorseNumber {
        self.suit.horse_number()
    }

    pub fn movement(&self) -> i8 {
        self.rank.movement()
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.rank.label(self.suit), self.suit.name())
    }
}

/// A card as persisted in the game row, tagged with the horse it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrawnCard {
    pub suit: Suit,
    pub rank: Rank,
    pub horse_number: HorseNumber,
}

impl DrawnCard {
    pub fn card(&self) -> Card {
        Card::new(self.suit, self.rank)
    }
}

impl From<Card> for DrawnCard {
    fn from(card: Card) -> Self {
        Self {
            suit: card.suit,
            rank: card.rank,
            horse_number: card.horse_number(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serde::assert_round_trip_json;

    #[test]
    fn movement_table() {
        let deltas: Vec<i8> = Rank::ALL.iter().map(|rank| rank.movement()).collect();
        assert_eq!(deltas, vec![-1, 1, 1, 1, 1, 1, 1, 3, 3, 3]);
    }

    #[test]
    fn suits_map_to_horses_both_ways() {
        for (index, suit) in Suit::ALL.iter().enumerate() {
            let number = HorseNumber::try_from(index + 1).unwrap();
            assert_eq!(suit.horse_number(), number);
            assert_eq!(Suit::for_horse(number), Some(*suit));
        }
        assert_eq!(Suit::for_horse(0), None);
        assert_eq!(Suit::for_horse(9), None);
    }

    #[test]
    fn sicilian_jack_is_a_queen() {
        assert_eq!(Rank::Jack.label(Suit::Coins), "Jack");
        assert_eq!(Rank::Jack.label(Suit::SicilianCoins), "Donna");
        assert_eq!(
            Card::new(Suit::SicilianSwords, Rank::Jack).to_string(),
            "Donna of Sicilian Swords"
        );
    }

    #[test]
    fn drawn_card_keeps_its_horse() {
        let drawn = DrawnCard::from(Card::new(Suit::Swords, Rank::King));
        assert_eq!(drawn.horse_number, 3);
        assert_eq!(drawn.card().movement(), 3);
        assert_round_trip_json(&drawn);
    }
}
