//! Session core for the tether gateway.
//!
//! - [`ConnectionManager`]: the single WebSocket link, reconnect and liveness
//! - [`SessionRouter`]: splits inbound envelopes into chat, tool and
//!   lifecycle channels
//! - [`ToolBridge`]: answers every `tool_request` exactly once
//! - [`ControlClient`]: HTTP setup and settings endpoints

pub mod backoff;
pub mod connection;
pub mod control;
pub mod error;
pub mod router;
pub mod state;
pub mod tools;
pub mod transport;

pub use {
    backoff::Backoff,
    connection::{ConnectionManager, ConnectionPolicy, EnvelopeSender},
    control::{ConfigSchema, ControlClient, SaveConfigResult, SchemaField, SchemaSection},
    error::{Error, Result},
    router::{Route, SessionRouter},
    state::ConnectionState,
    tools::{TOOL_CANCELLED, ToolBridge, ToolHandler},
    transport::{Connector, Inbound, Link, Outbound, Target, WsConnector},
};
