use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("fact not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, FactError>;
