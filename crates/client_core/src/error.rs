use std::time::Duration;

use thiserror::Error;

/// Why a create request did not produce an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not build request: {0}")]
    Request(String),
    #[error("request failed: {0}")]
    Network(String),
    #[error("{status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Request(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("event stream connection failed: {0}")]
    Connection(String),
    #[error("event stream ended")]
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("no notification received within {}ms", .0.as_millis())]
    TimedOut(Duration),
}
