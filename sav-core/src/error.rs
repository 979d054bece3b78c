use thiserror::Error;

#[derive(Error, Debug)]
pub enum SavError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Row {id} not found in {table}")]
    NotFound { table: String, id: String },

    #[error("Invalid column identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SavError>;
