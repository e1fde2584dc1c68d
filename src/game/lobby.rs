use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::domain::{GameConfig, GameId, GameRow, GameStatus, Participant, PeerIdentity};
use crate::store::{
    GameFilter, GameGuard, GameStore, InMemoryGameStore, NewGame, SeaOrmGameStore,
};

use super::error::SessionError;
use super::round;

const LOG_TARGET: &str = "game::lobby";
const INVITE_CODE_LEN: usize = 8;

/// Room management ahead of the race: create, list, join, start, delete.
#[derive(Clone)]
pub struct Lobby {
    store: Arc<dyn GameStore>,
}

impl Lobby {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }

    pub fn from_sea_orm(connection: DatabaseConnection) -> Self {
        Self::new(Arc::new(SeaOrmGameStore::new(connection)) as Arc<dyn GameStore>)
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryGameStore::new()) as Arc<dyn GameStore>)
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Creates a waiting room and registers its creator as the first
    /// participant. Private rooms get an invite code.
    pub async fn create_game(
        &self,
        creator: &PeerIdentity,
        config: GameConfig,
    ) -> Result<GameRow, SessionError> {
        config.validate()?;
        let invite_code = config.is_private.then(generate_invite_code);
        let game = self
            .store
            .insert_game(NewGame {
                created_by: creator.user_id,
                config,
                invite_code,
            })
            .await?;
        self.register(&game, creator).await?;
        info!(
            target: LOG_TARGET,
            game_id = %game.id,
            horses = game.config.horse_count,
            private = game.config.is_private,
            "game created"
        );
        Ok(game)
    }

    /// Public rooms still waiting for players, newest first.
    pub async fn list_open_games(&self) -> Result<Vec<GameRow>, SessionError> {
        Ok(self.store.find_games(&GameFilter::joinable()).await?)
    }

    pub async fn find_by_invite(&self, code: &str) -> Result<GameRow, SessionError> {
        let code = code.trim().to_ascii_uppercase();
        match self.store.find_game_by_invite(&code).await? {
            Some(game) if game.status == GameStatus::Waiting => Ok(game),
            _ => Err(SessionError::NotFound("game")),
        }
    }

    /// Registers `peer` in the room. Returning participants may re-enter at
    /// any stage; newcomers only while the room is waiting and not full.
    pub async fn join_game(
        &self,
        game_id: GameId,
        peer: &PeerIdentity,
    ) -> Result<GameRow, SessionError> {
        let game = self
            .store
            .load_game(game_id)
            .await?
            .ok_or(SessionError::NotFound("game"))?;
        let participants = self.store.load_participants(game_id).await?;
        if participants.iter().any(|p| p.user_id == peer.user_id) {
            return Ok(game);
        }
        if game.status != GameStatus::Waiting {
            return Err(SessionError::WrongStatus(game.status));
        }
        if participants.len() >= usize::from(game.config.max_players) {
            return Err(SessionError::GameFull {
                max: game.config.max_players,
            });
        }
        self.register(&game, peer).await?;
        info!(target: LOG_TARGET, game_id = %game_id, user_id = %peer.user_id, "player joined");
        Ok(game)
    }

    pub async fn start_game(
        &self,
        game_id: GameId,
        requester: &PeerIdentity,
    ) -> Result<GameRow, SessionError> {
        round::start_game(self.store.as_ref(), game_id, requester.user_id).await
    }

    /// Creator-only, and only before the race starts.
    pub async fn delete_game(
        &self,
        game_id: GameId,
        requester: &PeerIdentity,
    ) -> Result<(), SessionError> {
        let game = self
            .store
            .load_game(game_id)
            .await?
            .ok_or(SessionError::NotFound("game"))?;
        if !game.is_creator(requester.user_id) {
            return Err(SessionError::NotCreator("delete the game"));
        }
        if game.status != GameStatus::Waiting {
            return Err(SessionError::WrongStatus(game.status));
        }
        let guard = GameGuard::new().status(GameStatus::Waiting);
        if self.store.delete_game(game_id, &guard).await? {
            info!(target: LOG_TARGET, game_id = %game_id, "game deleted");
            Ok(())
        } else {
            Err(SessionError::Conflict)
        }
    }

    pub async fn roster(&self, game_id: GameId) -> Result<Vec<Participant>, SessionError> {
        Ok(self.store.load_participants(game_id).await?)
    }

    async fn register(&self, game: &GameRow, peer: &PeerIdentity) -> Result<(), SessionError> {
        self.store
            .upsert_participant(Participant {
                game_id: game.id,
                user_id: peer.user_id,
                display_name: peer.display_name.clone(),
                joined_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigError, PrizeDistribution};

    #[tokio::test]
    async fn postgres_lobby_reports_a_missing_connection() {
        let lobby = Lobby::from_sea_orm(DatabaseConnection::Disconnected);
        let err = lobby.list_open_games().await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn create_registers_the_creator() -> anyhow::Result<()> {
        let lobby = Lobby::in_memory();
        let host = PeerIdentity::random("host");
        let game = lobby.create_game(&host, GameConfig::default()).await?;

        assert_eq!(game.status, GameStatus::Waiting);
        assert!(game.invite_code.is_none());
        let roster = lobby.roster(game.id).await?;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "host");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_configs_are_rejected_before_insert() -> anyhow::Result<()> {
        let lobby = Lobby::in_memory();
        let host = PeerIdentity::random("host");
        let config = GameConfig {
            prize_distribution: PrizeDistribution::Top3,
            ..GameConfig::default()
        };
        let err = lobby.create_game(&host, config).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError::PrizeNeedsHorses { .. })
        ));
        assert!(lobby.list_open_games().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn private_rooms_are_found_by_invite_only() -> anyhow::Result<()> {
        let lobby = Lobby::in_memory();
        let host = PeerIdentity::random("host");
        let config = GameConfig {
            is_private: true,
            ..GameConfig::default()
        };
        let game = lobby.create_game(&host, config).await?;
        let code = game.invite_code.clone().expect("private rooms get a code");
        assert_eq!(code.len(), INVITE_CODE_LEN);

        assert!(lobby.list_open_games().await?.is_empty());
        let found = lobby.find_by_invite(&code.to_ascii_lowercase()).await?;
        assert_eq!(found.id, game.id);
        assert!(matches!(
            lobby.find_by_invite("NOPE1234").await,
            Err(SessionError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn join_respects_capacity_and_status() -> anyhow::Result<()> {
        let lobby = Lobby::in_memory();
        let host = PeerIdentity::random("host");
        let config = GameConfig {
            max_players: 2,
            ..GameConfig::default()
        };
        let game = lobby.create_game(&host, config).await?;

        let guest = PeerIdentity::random("guest");
        lobby.join_game(game.id, &guest).await?;
        lobby.join_game(game.id, &guest).await?;
        assert_eq!(lobby.roster(game.id).await?.len(), 2);

        let late = PeerIdentity::random("late");
        assert!(matches!(
            lobby.join_game(game.id, &late).await,
            Err(SessionError::GameFull { max: 2 })
        ));

        lobby.start_game(game.id, &host).await?;
        assert!(lobby.join_game(game.id, &guest).await.is_ok());
        assert!(matches!(
            lobby.join_game(game.id, &late).await,
            Err(SessionError::WrongStatus(GameStatus::Running))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn only_the_creator_deletes_a_waiting_room() -> anyhow::Result<()> {
        let lobby = Lobby::in_memory();
        let host = PeerIdentity::random("host");
        let guest = PeerIdentity::random("guest");
        let game = lobby.create_game(&host, GameConfig::default()).await?;
        lobby.join_game(game.id, &guest).await?;

        assert!(matches!(
            lobby.delete_game(game.id, &guest).await,
            Err(SessionError::NotCreator(_))
        ));
        lobby.delete_game(game.id, &host).await?;
        assert!(lobby.store().load_game(game.id).await?.is_none());
        assert!(lobby.roster(game.id).await?.is_empty());
        Ok(())
    }
}
