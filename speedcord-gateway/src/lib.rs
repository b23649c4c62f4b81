//! Sharded gateway client: connect/identify/resume, heartbeating, dispatch,
//! and identify admission control.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod intents;
pub mod shard;

pub use self::{
    client::{Client, ClientBuilder, GatewayInfo, ListenKey},
    dispatch::{EventDispatcher, Handler, OpcodeDispatcher},
    error::{Error, ErrorType, Result},
    intents::Intents,
    shard::Shard,
};
