use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::deck::DrawnCard;
use crate::domain::{GameConfig, GameRow};
use crate::store::StoreError;

const ENTITY: &str = "games";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "games")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub created_by: Uuid,
    pub num_horses: i16,
    pub max_players: i16,
    pub initial_chips: f64,
    pub max_bet: f64,
    pub prize_distribution: String,
    pub entry_fee: i32,
    pub is_private: bool,
    pub invite_code: Option<String>,
    pub status: String,
    pub current_round: i32,
    pub betting_phase: bool,
    pub timer_started: bool,
    pub round_started_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "JsonBinary")]
    pub cards_drawn: Json,
    pub current_card_index: i32,
    pub winner_horse: Option<i16>,
    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub finished_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn narrow<T, S>(column: &str, value: S) -> Result<T, StoreError>
where
    T: TryFrom<S>,
    S: Copy + std::fmt::Display,
{
    T::try_from(value).map_err(|_| StoreError::decode(ENTITY, format!("{column} out of range: {value}")))
}

pub(crate) fn encode_cards(cards: &[DrawnCard]) -> Result<Json, StoreError> {
    serde_json::to_value(cards).map_err(|err| StoreError::decode(ENTITY, err))
}

impl TryFrom<Model> for GameRow {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let cards_drawn: Vec<DrawnCard> = if model.cards_drawn.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(model.cards_drawn)
                .map_err(|err| StoreError::decode(ENTITY, format!("cards_drawn: {err}")))?
        };

        Ok(GameRow {
            id: model.id,
            created_by: model.created_by,
            config: GameConfig {
                horse_count: narrow("num_horses", model.num_horses)?,
                max_players: narrow("max_players", model.max_players)?,
                initial_chip_price: model.initial_chips,
                max_stake: model.max_bet,
                prize_distribution: model
                    .prize_distribution
                    .parse()
                    .map_err(|err| StoreError::decode(ENTITY, err))?,
                entry_fee: narrow("entry_fee", model.entry_fee)?,
                is_private: model.is_private,
            },
            invite_code: model.invite_code,
            status: model
                .status
                .parse()
                .map_err(|err| StoreError::decode(ENTITY, err))?,
            current_round: narrow("current_round", model.current_round)?,
            betting_phase: model.betting_phase,
            timer_started: model.timer_started,
            round_started_at: model.round_started_at,
            cards_drawn,
            current_card_index: narrow("current_card_index", model.current_card_index)?,
            winner_horse: model
                .winner_horse
                .map(|horse| narrow("winner_horse", horse))
                .transpose()?,
            created_at: model.created_at,
            started_at: model.started_at,
            finished_at: model.finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::{GameStatus, PrizeDistribution};

    fn model() -> Model {
        Model {
            id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            num_horses: 5,
            max_players: 4,
            initial_chips: 0.5,
            max_bet: 3.0,
            prize_distribution: "top-2".into(),
            entry_fee: 0,
            is_private: false,
            invite_code: None,
            status: "running".into(),
            current_round: 2,
            betting_phase: false,
            timer_started: true,
            round_started_at: Some(Utc::now()),
            cards_drawn: json!([
                {"suit": "sicilian_cups", "rank": "jack", "horse_number": 5},
                {"suit": "coins", "rank": "ace", "horse_number": 2}
            ]),
            current_card_index: 10,
            winner_horse: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[test]
    fn decodes_a_stored_row() {
        let row = GameRow::try_from(model()).unwrap();
        assert_eq!(row.config.horse_count, 5);
        assert_eq!(row.config.prize_distribution, PrizeDistribution::Top2);
        assert_eq!(row.status, GameStatus::Running);
        assert_eq!(row.cards_drawn.len(), 2);
        assert_eq!(row.cards_drawn[0].horse_number, 5);
        assert!(row.round_drawn());
    }

    #[test]
    fn null_cards_mean_no_cards() {
        let row = GameRow::try_from(Model {
            cards_drawn: Json::Null,
            ..model()
        })
        .unwrap();
        assert!(row.cards_drawn.is_empty());
    }

    #[test]
    fn bad_columns_are_decode_errors() {
        let bad_status = GameRow::try_from(Model {
            status: "paused".into(),
            ..model()
        });
        assert!(matches!(bad_status, Err(StoreError::Decode { .. })));

        let negative_round = GameRow::try_from(Model {
            current_round: -1,
            ..model()
        });
        assert!(matches!(negative_round, Err(StoreError::Decode { .. })));
    }

    #[test]
    fn realtime_payload_decodes_into_model() {
        let payload = json!({
            "id": "3f2a9c01-7b44-4d2e-9a55-0c1d2e3f4a5b",
            "created_by": "00000000-0000-4000-8000-000000000001",
            "num_horses": 4,
            "max_players": 3,
            "initial_chips": 0.2,
            "max_bet": 2.0,
            "prize_distribution": "winner-takes-all",
            "entry_fee": 0,
            "is_private": false,
            "invite_code": null,
            "status": "running",
            "current_round": 1,
            "betting_phase": true,
            "timer_started": true,
            "round_started_at": "2024-05-01T10:00:00+00:00",
            "cards_drawn": [],
            "current_card_index": 0,
            "winner_horse": null,
            "created_at": "2024-05-01T09:58:00+00:00",
            "started_at": "2024-05-01T10:00:00+00:00",
            "finished_at": null
        });
        let model: Model = serde_json::from_value(payload).unwrap();
        let row = GameRow::try_from(model).unwrap();
        assert!(row.betting_open());
        assert!(row.timer_started);
    }
}
