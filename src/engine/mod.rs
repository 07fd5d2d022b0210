//! Domain engines: attendance sessions, leave workflow and tour workflow.

mod attendance;
pub mod clock;
mod leave;
mod scheduler;
mod tour;

pub use attendance::*;
pub use clock::{Clock, CivilTime, ManualClock, SystemClock};
pub use leave::*;
pub use scheduler::*;
pub use tour::*;

/// Failures surfaced by the engines
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
