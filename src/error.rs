use std::path::PathBuf;

use thiserror::Error;

/// The engine rejected a model file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse model {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid model: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("no model loaded")]
    NoModel,

    #[error("single stepping requires a paused simulation")]
    NotPaused,

    #[error("slowdown must be a positive finite factor, got {0}")]
    InvalidSlowdown(f64),

    #[error("history archive holds states of {found} scalars, model expects {expected}")]
    HistoryMismatch { expected: usize, found: usize },

    #[error("corrupt history archive: {0}")]
    CorruptArchive(String),

    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
}
