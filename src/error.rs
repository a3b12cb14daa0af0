use crate::codec::FlvError;
use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No stream with name {0} found")]
    NoSuchStream(String),

    #[error("Stream {0} is already being published")]
    AlreadyPublishing(String),

    #[error("Unsupported method {0}")]
    UnsupportedMethod(String),

    #[error("Invalid upstream url {0}: {1}")]
    InvalidUpstream(String, String),

    #[error("Upstream for {0} failed: {1}")]
    UpstreamFailed(String, String),

    #[error("Publisher of {0} went away")]
    PublisherGone(String),

    #[error("Stream manager is not running")]
    ManagerUnavailable,

    #[error(transparent)]
    Flv(#[from] FlvError),

    #[error(transparent)]
    Http(#[from] hyper::Error),

    #[error(transparent)]
    Request(#[from] hyper::http::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Status code of the error response written to the client.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::NoSuchStream(_) | Error::UnsupportedMethod(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
