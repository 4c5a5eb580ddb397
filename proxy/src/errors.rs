use crate::config::ValidationError;
use hyper::StatusCode;
use publisher::PublishError;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),
}

/// Reasons a single publish request is answered with an error status.
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Request body too large")]
    BodyTooLarge,
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RequestError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RequestError::Publish(PublishError::Validation(_)) => StatusCode::BAD_REQUEST,
            RequestError::Publish(PublishError::Backend { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RequestError::Publish(PublishError::Cancelled { .. }) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
