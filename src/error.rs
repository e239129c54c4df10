use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Fetch failed or timed out at the exchange boundary.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The exchange response carried no usable option-chain data (no records, or rows without a spot).
    #[error("Empty snapshot: no usable option-chain data returned for {0}")]
    EmptySnapshot(String),

    /// Fewer than two history entries; rate-of-change analytics are unavailable.
    #[error("Insufficient history: {have} entries, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Transport(_) | AppError::Http(_) | AppError::EmptySnapshot(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
