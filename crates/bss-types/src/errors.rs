use thiserror::Error;

pub type Result<T, E = BssError> = std::result::Result<T, E>;

/// Unified error type covering the failure taxonomy of the dashboard client.
#[derive(Debug, Error)]
pub enum BssError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("settings fetch error: {0}")]
    Settings(String),
    #[error("media error: {0}")]
    Media(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
