//! Change notifications.
//!
//! A feed only wakes peers up. Nothing here is trusted for ordering or
//! completeness: a session re-reads the store whenever it lags, and polls
//! regardless.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::domain::{BetRow, GameId, GameRow, Participant, PlayerRoundState};

pub mod realtime;

pub use realtime::{SupabaseRealtimeFeed, SupabaseRealtimeFeedConfig};

/// Post-write snapshot of a row touching one game.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Game(GameRow),
    GameDeleted(GameId),
    Participant(Participant),
    Bet(BetRow),
    PlayerState(PlayerRoundState),
}

impl ChangeEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            ChangeEvent::Game(row) => row.id,
            ChangeEvent::GameDeleted(id) => *id,
            ChangeEvent::Participant(participant) => participant.game_id,
            ChangeEvent::Bet(bet) => bet.game_id,
            ChangeEvent::PlayerState(state) => state.game_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Game(_) => "game",
            ChangeEvent::GameDeleted(_) => "game_deleted",
            ChangeEvent::Participant(_) => "participant",
            ChangeEvent::Bet(_) => "bet",
            ChangeEvent::PlayerState(_) => "player_state",
        }
    }
}

pub trait ChangeFeed: Send + Sync {
    /// Starts delivering changes for `game_id`. Dropping the subscription
    /// unsubscribes.
    fn subscribe(&self, game_id: GameId) -> FeedSubscription;
}

#[derive(Debug)]
pub enum FeedEvent {
    Change(ChangeEvent),
    /// Events were dropped; the subscriber should re-read the store.
    Lagged(u64),
    Closed,
}

pub struct FeedSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    _stop: Option<DropGuard>,
}

impl FeedSubscription {
    pub fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx, _stop: None }
    }

    /// Subscription that cancels `stop` when dropped, tearing down whatever
    /// background connection feeds `rx`.
    pub fn with_stop(rx: broadcast::Receiver<ChangeEvent>, stop: CancellationToken) -> Self {
        Self {
            rx,
            _stop: Some(stop.drop_guard()),
        }
    }

    pub async fn recv(&mut self) -> FeedEvent {
        match self.rx.recv().await {
            Ok(event) => FeedEvent::Change(event),
            Err(RecvError::Lagged(skipped)) => FeedEvent::Lagged(skipped),
            Err(RecvError::Closed) => FeedEvent::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lag_is_reported_not_fatal() {
        let (tx, rx) = broadcast::channel(1);
        let mut sub = FeedSubscription::new(rx);
        let id = GameId::new_v4();
        tx.send(ChangeEvent::GameDeleted(id)).unwrap();
        tx.send(ChangeEvent::GameDeleted(id)).unwrap();

        assert!(matches!(sub.recv().await, FeedEvent::Lagged(1)));
        assert!(matches!(
            sub.recv().await,
            FeedEvent::Change(ChangeEvent::GameDeleted(got)) if got == id
        ));

        drop(tx);
        assert!(matches!(sub.recv().await, FeedEvent::Closed));
    }

    #[tokio::test]
    async fn dropping_the_subscription_cancels_its_connection() {
        let (_tx, rx) = broadcast::channel::<ChangeEvent>(4);
        let stop = CancellationToken::new();
        let sub = FeedSubscription::with_stop(rx, stop.clone());
        assert!(!stop.is_cancelled());
        drop(sub);
        assert!(stop.is_cancelled());
    }
}
