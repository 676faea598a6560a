//! Error types for render sessions

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to spawn renderer {program:?} in {dir:?}: {source}")]
    Spawn {
        program: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write render request: {0}")]
    Write(#[source] std::io::Error),

    #[error("render session for {0:?} is dead")]
    Dead(PathBuf),

    #[error("render request timed out after {0:?}")]
    Timeout(Duration),

    #[error("render request was dropped without a reply")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, SessionError>;
