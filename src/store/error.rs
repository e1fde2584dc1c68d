use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("failed to decode {entity} row: {reason}")]
    Decode {
        entity: &'static str,
        reason: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn decode(entity: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            entity,
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
