//! Kemet assistant core: vehicle state, the tools the conversational model
//! can call, and the orchestration of one realtime session.

pub mod backend;
pub mod context;
pub mod events;
pub mod gateway;
pub mod session;
pub mod signal;
pub mod tools;
pub mod transport;
pub mod vehicle;
