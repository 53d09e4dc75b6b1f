//! Error types for voxq.

use thiserror::Error;

use crate::model::{State, WorkKind};

#[derive(Debug, Error)]
pub enum Error {
    /// A cache key with no backing voice definition.
    #[error("voice not found: {0}")]
    NotFound(String),

    #[error("no handler registered for {0}")]
    HandlerMissing(WorkKind),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("dispatch loop fault: {0}")]
    DispatchLoopFault(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: State, to: State },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
