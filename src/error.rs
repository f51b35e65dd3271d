use thiserror::Error;

use hue::error::HueError;

use crate::cache::CacheError;
use crate::sink::SinkError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    HueError(#[from] HueError),

    #[error(transparent)]
    CacheError(#[from] CacheError),

    #[error(transparent)]
    TransportError(#[from] TransportError),

    #[error(transparent)]
    SinkError(#[from] SinkError),

    /* huesync errors */
    #[error("Session for bridge {0:?} has stopped")]
    SessionClosed(String),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl ApiError {
    #[must_use]
    pub fn service_error(msg: impl Into<String>) -> Self {
        Self::ServiceError(msg.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
