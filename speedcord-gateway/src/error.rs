//! The gateway client's error taxonomy: login failures and the fatal close
//! codes that surface through them.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// An error surfaced by the gateway client.
///
/// Most of these are *fatal*: the client records them via `fatal(...)` and
/// `run()` re-raises them after shutdown. The exception is
/// [`ErrorType::Http`], which may also occur on recoverable paths such as
/// refreshing the session budget.
#[derive(Debug)]
pub struct Error {
    source: Option<Box<dyn StdError + Send + Sync>>,
    kind: ErrorType,
}

impl Error {
    #[must_use = "retrieving the type has no effect if left unused"]
    pub fn kind(&self) -> &ErrorType {
        &self.kind
    }

    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
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

impl From<speedcord_http::Error> for Error {
    fn from(source: speedcord_http::Error) -> Self {
        Self::with_source(ErrorType::Http, source)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::ConnectionsExceeded => {
                f.write_str("you have exceeded your gateway connection limits")
            }
            ErrorType::GatewayClosed => f.write_str("you can't do this as the gateway is closed"),
            ErrorType::GatewayNotAuthenticated => {
                f.write_str("a payload was sent to the gateway before authenticating")
            }
            ErrorType::GatewayUnavailable => {
                f.write_str("can't reach the discord gateway")
            }
            ErrorType::IntentNotWhitelisted => {
                f.write_str("tried to launch with intents this bot is not whitelisted for")
            }
            ErrorType::InvalidGatewayVersion => f.write_str("invalid gateway version"),
            ErrorType::InvalidIntentNumber => f.write_str("the intent number provided is not valid"),
            ErrorType::InvalidShardCount => {
                f.write_str("invalid shard count sent to discord with pinned shard ids")
            }
            ErrorType::InvalidToken => f.write_str("invalid token provided"),
            ErrorType::Http => f.write_str("an http request failed"),
            ErrorType::Serialization => f.write_str("failed to serialize an outbound gateway frame"),
            ErrorType::UsageError { message } => f.write_str(message),
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
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// The session start budget reported by `/gateway/bot` was empty.
    ConnectionsExceeded,
    /// A send was attempted on a socket that is already closed.
    GatewayClosed,
    /// Close code 4003: a payload was sent before IDENTIFY/RESUME completed.
    GatewayNotAuthenticated,
    /// The gateway host could not be reached at all.
    GatewayUnavailable,
    /// Close code 4014.
    IntentNotWhitelisted,
    /// Close code 4012.
    InvalidGatewayVersion,
    /// Close code 4013.
    InvalidIntentNumber,
    /// Close code 4010 while shard ids were pinned by the user.
    InvalidShardCount,
    /// No token, or the server rejected it (401 on `/gateway/bot`, or 4004).
    InvalidToken,
    /// A request to the REST API failed.
    Http,
    /// Serializing an outbound frame failed.
    Serialization,
    /// The caller misused the public API (e.g. `shard_ids` without
    /// `shard_count`, or calling `listen` with a key of the wrong type).
    UsageError { message: &'static str },
}
