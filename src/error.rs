use std::sync::Arc;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the flag client.
///
/// A missing flag is not an error: [`Client::variation`](crate::Client::variation) falls back to
/// the default value and [`Client::variation_detail`](crate::Client::variation_detail) reports it
/// as an [`ErrorKind::FlagNotFound`](crate::ErrorKind::FlagNotFound) reason.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The identity passed to the client has no key.
    #[error("identity must have a non-empty key")]
    InvalidIdentity,

    /// A newer `identify` call was started before this one completed. Its result was discarded.
    #[error("identify was superseded by a newer call")]
    IdentifySuperseded,

    /// Invalid base, stream, or events URL configuration.
    #[error("invalid url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The server responded with a non-success status code.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(u16),

    /// A message received on the live update stream could not be parsed.
    #[error("malformed stream message: {0}")]
    StreamParse(String),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The stream connection failed or was interrupted.
    #[error("stream connection failed: {0}")]
    Stream(String),

    /// Failed to serialize or deserialize a payload.
    #[error(transparent)]
    Serialization(Arc<serde_json::Error>),

    /// The persistence collaborator failed to load or store a snapshot.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(value))
    }
}

// Wrapped library errors have no equality of their own and compare by identity.
impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        match (self, other) {
            (Error::InvalidIdentity, Error::InvalidIdentity)
            | (Error::IdentifySuperseded, Error::IdentifySuperseded)
            | (Error::ClientClosed, Error::ClientClosed) => true,
            (Error::InvalidBaseUrl(a), Error::InvalidBaseUrl(b)) => a == b,
            (Error::UnexpectedStatus(a), Error::UnexpectedStatus(b)) => a == b,
            (Error::StreamParse(a), Error::StreamParse(b))
            | (Error::Stream(a), Error::Stream(b))
            | (Error::Persistence(a), Error::Persistence(b)) => a == b,
            (Error::Network(a), Error::Network(b)) => Arc::ptr_eq(a, b),
            (Error::Serialization(a), Error::Serialization(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
