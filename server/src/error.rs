use crate::game::GameError;
use crate::store::StoreError;
use crate::words::WordsError;
use shared::InvalidGameId;

/// Failures of a single client request. None of these are fatal to the
/// server; each is scoped to the requesting connection.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Permission(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    Words(#[from] WordsError),
}

impl EngineError {
    pub fn game_not_found() -> Self {
        EngineError::NotFound("Game not found".to_string())
    }

    /// Message to send back to the requester, if any
    pub fn client_message(&self) -> Option<String> {
        match self {
            EngineError::Validation(msg) | EngineError::NotFound(msg) => Some(msg.clone()),
            EngineError::Permission(_) => None,
            EngineError::Persistence(_) | EngineError::Words(_) => {
                Some("Something went wrong, please try again".to_string())
            }
        }
    }
}

impl From<GameError> for EngineError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::NotLeader => EngineError::Permission(err.to_string()),
            GameError::NotAPlayer => EngineError::NotFound(err.to_string()),
            _ => EngineError::Validation(err.to_string()),
        }
    }
}

impl From<InvalidGameId> for EngineError {
    fn from(err: InvalidGameId) -> Self {
        EngineError::Validation(err.to_string())
    }
}
