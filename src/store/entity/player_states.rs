use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::PlayerRoundState;
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "player_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub game_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub round_number: i32,
    pub betting_window_closed: bool,
    pub closed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::games::Entity",
        from = "Column::GameId",
        to = "super::games::Column::Id",
        on_delete = "Cascade"
    )]
    Game,
}

impl Related<super::games::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Game.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for PlayerRoundState {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(PlayerRoundState {
            game_id: model.game_id,
            user_id: model.user_id,
            round: u32::try_from(model.round_number)
                .map_err(|_| StoreError::decode("player_states", "negative round number"))?,
            betting_window_closed: model.betting_window_closed,
            closed_at: model.closed_at,
        })
    }
}
