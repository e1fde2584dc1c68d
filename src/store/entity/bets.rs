use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::BetRow;
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub game_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub horse_number: i16,
    pub amount: f64,
    pub chips: i32,
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

impl TryFrom<Model> for BetRow {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(BetRow {
            game_id: model.game_id,
            user_id: model.user_id,
            horse_number: u8::try_from(model.horse_number)
                .map_err(|_| StoreError::decode("bets", "horse_number out of range"))?,
            amount: model.amount,
            chips: u32::try_from(model.chips)
                .map_err(|_| StoreError::decode("bets", "negative chip count"))?,
        })
    }
}
