use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Engine command not found")]
    EngineNotFound,

    #[error("Engine is already running")]
    EngineAlreadyRunning,

    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Engine failed to start: {0}")]
    EngineStartFailed(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
