use serde::Serialize;

use crate::deck::Suit;
use crate::domain::{HorseNumber, FINISH_LINE, TRACK_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Horse {
    pub number: HorseNumber,
    pub suit: Suit,
    pub name: &'static str,
    pub colour: &'static str,
    pub position: u8,
}

impl Horse {
    pub fn new(suit: Suit) -> Self {
        Self {
            number: suit.horse_number(),
            suit,
            name: suit.name(),
            colour: suit.colour(),
            position: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.position > FINISH_LINE
    }

    /// Applies `delta` clamped to the track. Returns the new position, or
    /// `None` when the horse has already finished and stays put.
    pub(crate) fn advance(&mut self, delta: i8) -> Option<u8> {
        if self.is_finished() {
            return None;
        }
        let next = (i16::from(self.position) + i16::from(delta)).clamp(0, i16::from(TRACK_LENGTH));
        // clamp keeps the value within 0..=TRACK_LENGTH
        self.position = next as u8;
        Some(self.position)
    }
}
