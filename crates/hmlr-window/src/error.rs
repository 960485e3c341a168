use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Block(#[from] hmlr_blocks::BlockError),

    #[error(transparent)]
    Memory(#[from] hmlr_memory::MemoryError),
}

pub type Result<T> = std::result::Result<T, WindowError>;
