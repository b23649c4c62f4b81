//! Rate-limit-aware REST client for the Discord HTTP API.
//!
//! This crate implements a [`Route`]/bucket model, a
//! [`ratelimiting::GlobalLock`] + per-bucket lock table, and a [`Client`]
//! that wires them into a retrying request pipeline.
//! It carries no resource model -- the only route it knows by name is
//! `GET /gateway/bot`; everything else goes through [`Client::request`] with
//! a caller-built [`Route`].

pub mod client;
pub mod error;
pub mod ratelimiting;
pub mod routing;

pub use self::{
    client::{ApiResponse, Client, ClientBuilder, GatewayBot, SessionStartLimit},
    error::{Error, ErrorType, Result},
    routing::{Method, Route},
};
