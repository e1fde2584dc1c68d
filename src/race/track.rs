use serde::Serialize;

use crate::deck::{Card, Deck, Suit};
use crate::domain::HorseNumber;

use super::Horse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Movement {
    pub card: Card,
    pub horse_number: HorseNumber,
    pub from: u8,
    /// `None` when the horse had already finished.
    pub to: Option<u8>,
}

/// Horses plus the deck cursor they have been replayed up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    horses: Vec<Horse>,
    cursor: u32,
}

impl Track {
    pub fn new(horse_count: u8) -> Self {
        let horses = Suit::ALL
            .iter()
            .take(usize::from(horse_count))
            .map(|suit| Horse::new(*suit))
            .collect();
        Self { horses, cursor: 0 }
    }

    pub fn horses(&self) -> &[Horse] {
        &self.horses
    }

    pub fn horse(&self, number: HorseNumber) -> Option<&Horse> {
        self.horses.iter().find(|horse| horse.number == number)
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    fn apply(&mut self, card: Card) -> Option<Movement> {
        let number = card.horse_number();
        let horse = self.horses.iter_mut().find(|horse| horse.number == number)?;
        let from = horse.position;
        let to = horse.advance(card.movement());
        Some(Movement {
            card,
            horse_number: number,
            from,
            to,
        })
    }

    /// Replays `deck[cursor..target]`. A target at or behind the cursor is a
    /// no-op, so repeated or stale observations never move a horse twice.
    pub fn catch_up(&mut self, deck: &Deck, target: u32) -> Vec<Movement> {
        if target <= self.cursor {
            return Vec::new();
        }
        let count = (target - self.cursor) as usize;
        let cards: Vec<Card> = deck.slice(self.cursor, count).to_vec();
        let mut movements = Vec::with_capacity(cards.len());
        for card in cards {
            if let Some(movement) = self.apply(card) {
                movements.push(movement);
            }
        }
        self.cursor = target;
        movements
    }

    pub fn finished_count(&self) -> usize {
        self.horses.iter().filter(|horse| horse.is_finished()).count()
    }

    /// Finished horses first, then by position descending. Ties keep horse
    /// order.
    pub fn ranking(&self) -> Vec<Horse> {
        let mut ranked = self.horses.clone();
        ranked.sort_by(|a, b| {
            b.is_finished()
                .cmp(&a.is_finished())
                .then(b.position.cmp(&a.position))
        });
        ranked
    }

    #[cfg(test)]
    pub(crate) fn place(&mut self, number: HorseNumber, position: u8) {
        if let Some(horse) = self.horses.iter_mut().find(|horse| horse.number == number) {
            horse.position = position;
        }
    }

    /// Enough horses are past the line to fill every paid position.
    pub fn podium_filled(&self, paid_positions: usize) -> bool {
        self.finished_count() >= paid_positions
    }
}
