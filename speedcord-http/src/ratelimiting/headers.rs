//! Parse the typed ratelimit headers the engine needs out of a response.
//!
//! [`RatelimitHeaders::from_pairs`] is intentionally narrower than the full
//! Discord header set (there is no `bucket`/`limit` hash here, since the
//! bucket key this crate uses is [`crate::routing::Route::bucket`], not the
//! server-issued hash) -- it only parses what the request pipeline
//! consumes: remaining, reset-after, the global flag, and retry-after.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    str::{self, Utf8Error},
};

/// An error parsing one of the ratelimit headers out of a response.
#[derive(Debug)]
pub struct HeaderParsingError {
    pub(super) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(super) kind: HeaderParsingErrorType,
}

impl HeaderParsingError {
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }

    fn parsing(name: HeaderName, value: String) -> Self {
        Self {
            kind: HeaderParsingErrorType::Parsing { name, value },
            source: None,
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                write!(f, "header '{}' is not valid utf-8: {:?}", name.name(), value)
            }
            HeaderParsingErrorType::Parsing { name, value } => {
                write!(f, "header '{}' can't be parsed as a number: '{}'", name.name(), value)
            }
        }
    }
}

impl StdError for HeaderParsingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// The type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Header value was not UTF-8 valid.
    NotUtf8 { name: HeaderName, value: Vec<u8> },
    /// Header value was not a valid number.
    Parsing { name: HeaderName, value: String },
}

/// Typed name of a ratelimit header, used only for error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    Global,
    Remaining,
    ResetAfter,
    RetryAfter,
}

impl HeaderName {
    pub const GLOBAL: &'static str = "x-ratelimit-global";
    pub const REMAINING: &'static str = "x-ratelimit-remaining";
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";
    pub const RETRY_AFTER: &'static str = "retry-after";

    pub const fn name(self) -> &'static str {
        match self {
            Self::Global => Self::GLOBAL,
            Self::Remaining => Self::REMAINING,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::RetryAfter => Self::RETRY_AFTER,
        }
    }
}

/// The ratelimit-relevant headers of a non-429 response.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RatelimitHeaders {
    /// `X-RateLimit-Remaining`, if present.
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset-After`, in milliseconds, if present.
    pub reset_after_ms: Option<u64>,
}

impl RatelimitHeaders {
    /// Parses the headers needed to decide whether a bucket should defer its
    /// release, out of an iterator of lowercased header name/value pairs.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut remaining = None;
        let mut reset_after_ms = None;

        for (name, value) in headers {
            match name {
                HeaderName::REMAINING => {
                    remaining = Some(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET_AFTER => {
                    let seconds = header_float(HeaderName::ResetAfter, value)?;
                    reset_after_ms = Some(seconds_to_millis(seconds));
                }
                _ => continue,
            }
        }

        Ok(Self {
            remaining,
            reset_after_ms,
        })
    }
}

/// The body of a 429 response: whether the limit is global, and how long to
/// wait before retrying.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RatelimitExceeded {
    pub is_global: bool,
    pub retry_after_ms: u64,
}

fn seconds_to_millis(seconds: f64) -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (seconds * 1000.).ceil().max(0.) as u64
    }
}

fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    str::from_utf8(value).map_err(|source| HeaderParsingError::not_utf8(name, value.to_vec(), source))
}

fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = header_str(name, value)?;
    text.parse()
        .map_err(|_| HeaderParsingError::parsing(name, text.to_owned()))
}

fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = header_str(name, value)?;
    text.parse()
        .map_err(|_| HeaderParsingError::parsing(name, text.to_owned()))
}

/// Parses the `X-RateLimit-Global`/`retry_after` pair out of a decoded 429
/// response body. Takes raw JSON rather than headers because Discord reports
/// `retry_after` in the body, not a header, on 429s.
pub fn parse_429_body(value: &serde_json::Value) -> Option<RatelimitExceeded> {
    let retry_after = value.get("retry_after")?.as_f64()?;
    let is_global = value.get("global").and_then(serde_json::Value::as_bool).unwrap_or(false);

    Some(RatelimitExceeded {
        is_global,
        retry_after_ms: seconds_to_millis(retry_after),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remaining_and_reset_after() {
        let pairs = [
            (HeaderName::REMAINING, b"0".as_slice()),
            (HeaderName::RESET_AFTER, b"1.250".as_slice()),
        ];
        let headers = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap();
        assert_eq!(headers.remaining, Some(0));
        assert_eq!(headers.reset_after_ms, Some(1250));
    }

    #[test]
    fn unknown_headers_are_ignored() {
        let pairs = [("x-some-other-header", b"whatever".as_slice())];
        let headers = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap();
        assert_eq!(headers, RatelimitHeaders::default());
    }

    #[test]
    fn rejects_non_numeric_remaining() {
        let pairs = [(HeaderName::REMAINING, b"not-a-number".as_slice())];
        let err = RatelimitHeaders::from_pairs(pairs.into_iter()).unwrap_err();
        assert!(matches!(err.kind(), HeaderParsingErrorType::Parsing { .. }));
    }

    #[test]
    fn parses_global_429_body() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"message":"limited","retry_after":0.5,"global":true}"#).unwrap();
        let parsed = parse_429_body(&body).unwrap();
        assert!(parsed.is_global);
        assert_eq!(parsed.retry_after_ms, 500);
    }

    #[test]
    fn parses_non_global_429_body() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"message":"limited","retry_after":0.2}"#).unwrap();
        let parsed = parse_429_body(&body).unwrap();
        assert!(!parsed.is_global);
        assert_eq!(parsed.retry_after_ms, 200);
    }
}
