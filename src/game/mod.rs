//! Race coordination: lobby, round life cycle, betting windows, card draws,
//! settlement and the per-peer session that drives them.

pub mod betting;
pub mod draw;
mod error;
pub mod lobby;
pub mod round;
pub mod session;
pub mod settlement;
pub mod snapshot;


pub use betting::{chip_price, StakeQuote, StakeRequest};
pub use error::{SessionError, StakeError};
pub use lobby::Lobby;
pub use round::{FinishReason, RoundPhase, RoundStep};
pub use session::{PeerSession, SessionHandle};
pub use settlement::{PlayerResult, PodiumPlace, Settlement};
pub use snapshot::{Countdown, PeerSnapshot, RosterEntry, RoundReveal};
