//! Describing a REST route and the bucket it falls into.

use std::fmt::Write;

/// A single REST API route: an HTTP method, a rendered path, and the
/// channel/guild scope (if any) used to compute its ratelimit bucket key.
///
/// Routes are rendered eagerly at construction time rather than lazily.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    method: Method,
    path: String,
    channel_id: Option<u64>,
    guild_id: Option<u64>,
}

/// Standard HTTP method used by a [`Route`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Method {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl From<Method> for hyper::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Delete => hyper::Method::DELETE,
            Method::Get => hyper::Method::GET,
            Method::Patch => hyper::Method::PATCH,
            Method::Post => hyper::Method::POST,
            Method::Put => hyper::Method::PUT,
        }
    }
}

impl Route {
    /// Builds a route with no channel/guild scope, e.g. `GET /gateway/bot`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            channel_id: None,
            guild_id: None,
        }
    }

    /// Scopes this route to a channel, so it shares a bucket with other
    /// routes scoped to the same channel and path.
    #[must_use]
    pub const fn channel(mut self, channel_id: u64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    /// Scopes this route to a guild, so it shares a bucket with other
    /// routes scoped to the same guild and path.
    #[must_use]
    pub const fn guild(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The synthetic bucket key `"<channel_id>:<guild_id>:<path>"`. Scopes
    /// that are absent render as the literal string `None`, matching the
    /// format the server-side bucket grouping expects.
    pub fn bucket(&self) -> String {
        let mut bucket = String::with_capacity(self.path.len() + 8);
        match self.channel_id {
            Some(id) => {
                let _ = write!(bucket, "{}", id);
            }
            None => bucket.push_str("None"),
        }
        bucket.push(':');
        match self.guild_id {
            Some(id) => {
                let _ = write!(bucket, "{}", id);
            }
            None => bucket.push_str("None"),
        }
        bucket.push(':');
        bucket.push_str(&self.path);
        bucket
    }
}
