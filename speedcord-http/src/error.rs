//! The error type returned by [`Client::request`] and the rate-limiting
//! primitives it wraps.
//!
//! [`Client::request`]: crate::client::Client::request

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

use hyper::StatusCode;

use crate::ratelimiting::HeaderParsingError;

pub type Result<T, E = Error> = StdResult<T, E>;

/// An error that occurred while sending a request or processing its response.
#[derive(Debug)]
pub struct Error {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ErrorType,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn new(kind: ErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: ErrorType, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

impl From<HeaderParsingError> for Error {
    fn from(source: HeaderParsingError) -> Self {
        Self::with_source(ErrorType::RatelimitHeaders, source)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::ConnectionsExceeded => {
                f.write_str("no gateway session starts remain in the current window")
            }
            ErrorType::Forbidden { .. } => {
                f.write_str("the token is not permitted to access this resource")
            }
            ErrorType::Json => f.write_str("the response body could not be parsed as json"),
            ErrorType::NotFound { .. } => f.write_str("the requested resource does not exist"),
            ErrorType::RatelimitHeaders => {
                f.write_str("the server's ratelimit headers could not be parsed")
            }
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::Response { status, .. } => {
                write!(f, "received an unexpected status code: {}", status)
            }
            ErrorType::RetriesExhausted => {
                f.write_str("exceeded the maximum number of ratelimit retries")
            }
            ErrorType::Unauthorized => {
                f.write_str("the token in use is missing or invalid")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// The type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Building the HTTPS request failed.
    BuildingRequest,
    /// The session start budget reported by `/gateway/bot` is exhausted.
    ConnectionsExceeded,
    /// The server returned 403 Forbidden.
    Forbidden {
        /// Raw response body.
        body: Vec<u8>,
    },
    /// The response body could not be deserialized as JSON.
    Json,
    /// The server returned 404 Not Found.
    NotFound {
        /// Raw response body.
        body: Vec<u8>,
    },
    /// The server's ratelimit headers were malformed.
    RatelimitHeaders,
    /// Sending the request over the wire failed (DNS, TLS, connection reset, ...).
    RequestError,
    /// The server returned an error status not otherwise classified (>= 300,
    /// excluding 401/403/404/429).
    Response {
        /// Raw response body.
        body: Vec<u8>,
        /// The response's status code.
        status: StatusCode,
    },
    /// The 429 retry budget was exhausted without a non-429 response.
    RetriesExhausted,
    /// The server returned 401 Unauthorized.
    Unauthorized,
}
