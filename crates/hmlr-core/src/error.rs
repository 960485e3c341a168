use serde::Serialize;
use thiserror::Error;

/// Disposition-oriented error taxonomy. The pipeline maps every failure of
/// a critical step into one of these kinds before surfacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable external failure (embedder 5xx, LLM timeout, storage retry).
    TransientExternal,
    /// Non-retryable external failure (auth, quota).
    PermanentExternal,
    /// Malformed payload from an external model; fallbacks apply per subtask.
    Parse,
    /// A core invariant was observed broken (two ACTIVE blocks, torn
    /// supersession chain). Always fatal.
    InvariantViolation,
    /// Optimistic concurrency / write conflict in the storage driver.
    StorageConflict,
    /// Storage failure that is not a conflict.
    Storage,
    Internal,
}

impl ErrorKind {
    /// Short error code string included in structured turn failures.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TransientExternal => "TRANSIENT_EXTERNAL",
            ErrorKind::PermanentExternal => "PERMANENT_EXTERNAL",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::InvariantViolation => "INVARIANT_VIOLATION",
            ErrorKind::StorageConflict => "STORAGE_CONFLICT",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Structured failure of a chat turn: names the pipeline step that failed
/// and the error kind, so the caller observes exactly one of a complete
/// response or one of these.
#[derive(Debug, Error)]
#[error("turn failed at {step} [{}]: {message}", kind.code())]
pub struct TurnError {
    pub step: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(step: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_error_display_names_step_and_code() {
        let err = TurnError::new("governor", ErrorKind::TransientExternal, "timed out");
        let msg = err.to_string();
        assert!(msg.contains("governor"));
        assert!(msg.contains("TRANSIENT_EXTERNAL"));
    }
}
