use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("block not found: {id}")]
    NotFound { id: String },

    #[error("LLM synthesis failed: {0}")]
    Synthesis(String),
}

pub type Result<T> = std::result::Result<T, BlockError>;
