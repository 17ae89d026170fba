//! Realtime transport for the Kemet assistant.
//!
//! Implements the core's [`RealtimeTransport`](kemet_core::transport::RealtimeTransport)
//! over a websocket speaking the OpenAI-compatible realtime protocol, which
//! both xAI's Grok voice API and OpenAI's realtime API accept.

pub mod client;
pub mod config;
pub mod protocol;

pub use client::{WebSocketLink, WebSocketTransport};
pub use config::{Provider, RealtimeConfig};
