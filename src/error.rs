// Host-service errors and their HTTP mapping.

use axum::{extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::battle::BattleError;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// Empty or oversized spell text and other malformed input.
    #[error("{0}")]
    InvalidInput(String),
    #[error("{message}")]
    ModerationBlocked {
        message: String,
        categories: Vec<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl From<BattleError> for GameError {
    fn from(e: BattleError) -> Self {
        GameError::Conflict(e.to_string())
    }
}

/// Malformed or mistyped request bodies answer with the usual `{error}` shape.
impl From<JsonRejection> for GameError {
    fn from(rejection: JsonRejection) -> Self {
        GameError::InvalidInput(rejection.body_text())
    }
}

impl GameError {
    pub fn status(&self) -> StatusCode {
        match self {
            GameError::InvalidInput(_) | GameError::ModerationBlocked { .. } => {
                StatusCode::BAD_REQUEST
            }
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::Conflict(_) => StatusCode::CONFLICT,
            GameError::Forbidden(_) => StatusCode::FORBIDDEN,
            GameError::Database(_) | GameError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GameError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = match &self {
            GameError::ModerationBlocked {
                message,
                categories,
            } => json!({
                "error": "moderation_failure",
                "message": message,
                "type": "content_moderation",
                "flaggedCategories": categories,
            }),
            GameError::Database(e) => {
                tracing::error!("Database error: {e}");
                json!({ "error": "Internal server error", "message": "Internal server error" })
            }
            GameError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                json!({ "error": "Internal server error", "message": msg })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
