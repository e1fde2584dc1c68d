pub mod config;
pub mod deck;
pub mod domain;
pub mod feed;
pub mod game;
pub mod race;
pub mod store;
pub mod tokio_tools;

#[cfg(test)]
pub mod test_utils;

pub use config::SessionConfig;
pub use domain::{GameConfig, GameId, GameRow, GameStatus, PeerIdentity, PrizeDistribution, UserId};
pub use game::{PeerSession, PeerSnapshot, SessionHandle};
