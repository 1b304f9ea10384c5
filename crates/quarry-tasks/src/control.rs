//! Typed control flow a [`crate::handler::Handler`] can signal back to the
//! engine, distinct from an ordinary `Err` (which just means "failed, let
//! the retry policy decide").

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskControl {
    #[error("task canceled: {0}")]
    Cancel(String),
    #[error("retry requested immediately, bypassing backoff")]
    Retry,
    #[error("reschedule requested for {0}")]
    Reschedule(DateTime<Utc>),
    #[error("task failed permanently: {0}")]
    Fail(String),
}

/// Everything a handler can return: either one of the typed control
/// signals above, or an arbitrary failure that the retry policy handles
/// normally (count against `max_attempts`, back off, eventually `Failed`).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Control(#[from] TaskControl),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn as_control(&self) -> Option<&TaskControl> {
        match self {
            HandlerError::Control(c) => Some(c),
            HandlerError::Other(_) => None,
        }
    }
}
