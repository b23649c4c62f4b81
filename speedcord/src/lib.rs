//! A sharded gateway client and rate-limit-aware REST client for
//! Discord-style bots.
//!
//! This crate is a thin façade over `speedcord-gateway`, `speedcord-http`,
//! and `speedcord-ratelimiter`; most applications only need this crate.

pub use speedcord_gateway::{
    Client, ClientBuilder, Error, ErrorType, EventDispatcher, GatewayInfo, Handler, Intents, ListenKey, OpcodeDispatcher,
    Result, Shard,
};
pub use speedcord_http::{ApiResponse, GatewayBot, Method, Route, SessionStartLimit};
pub use speedcord_ratelimiter::TimesPer;

pub mod http {
    //! The raw REST client, re-exported for callers that want to issue
    //! arbitrary requests the gateway client itself has no model for.
    pub use speedcord_http::*;
}

pub mod gateway {
    //! The gateway internals, re-exported for callers that want to build
    //! their own shard orchestration on top of the dispatchers directly.
    pub use speedcord_gateway::*;
}
