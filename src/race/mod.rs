//! Local horse positions.
//!
//! Positions are never stored. Each peer rebuilds them by replaying its own
//! copy of the deck up to the shared `current_card_index`, so a peer that
//! joins late lands on exactly the same track as everyone else.

mod horse;
mod track;

pub use horse::Horse;
pub use track::{Movement, Track};
