//! Error types for shogi-analyzer-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Engine not found: {}", .0.display())]
    EngineNotFound(PathBuf),

    #[error("Failed to start engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Engine not ready")]
    NotReady,

    #[error("Engine degraded: {0}")]
    EngineDegraded(String),

    #[error("Engine process exited")]
    SubprocessExited,

    #[error("Analysis timeout after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("Engine startup timeout after {}s", .0.as_secs_f32())]
    StartupTimeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for conditions where the engine cannot serve analysis at all,
    /// as opposed to a problem with one particular request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::NotReady | Error::EngineDegraded(_) | Error::SubprocessExited
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
