use crate::deck::DeckError;
use crate::domain::{ConfigError, GameStatus, HorseNumber};
use crate::store::StoreError;

/// Rejections a player sees when buying stakes or closing a window.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StakeError {
    #[error("betting is closed for this round")]
    WindowClosed,
    #[error("you already closed your betting window for round {0}")]
    OwnWindowClosed(u32),
    #[error("the race is over")]
    RaceFinished,
    #[error("there is no horse {0} in this race")]
    UnknownHorse(HorseNumber),
    #[error("horse {horse} is at position {position}; stakes close at {limit}")]
    HorseTooFarAhead {
        horse: HorseNumber,
        position: u8,
        limit: u8,
    },
    #[error("stakes are limited to {limit} different horses")]
    TooManyHorses { limit: usize },
    #[error("a purchase must be between 1 and {max} chips, got {chips}", max = super::betting::MAX_CHIPS_PER_PURCHASE)]
    InvalidChips { chips: u32 },
    #[error("this purchase would bring the window total to {total:.2}, above the {limit:.2} limit")]
    WindowLimitExceeded { total: f64, limit: f64 },
    #[error("place a stake before closing the betting window")]
    NothingStaked,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stake(#[from] StakeError),
    #[error(transparent)]
    Deck(#[from] DeckError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("only the game creator can {0}")]
    NotCreator(&'static str),
    #[error("at least {required} participants are needed to start, found {found}")]
    NotEnoughPlayers { required: usize, found: usize },
    #[error("the game is full ({max} players)")]
    GameFull { max: u8 },
    #[error("the game is {0}")]
    WrongStatus(GameStatus),
    #[error("another peer changed the game first; try again")]
    Conflict,
    #[error("peer session has shut down")]
    SessionClosed,
}

impl SessionError {
    /// Errors that come from the game's rules rather than the environment.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, SessionError::Store(_) | SessionError::SessionClosed)
    }
}
