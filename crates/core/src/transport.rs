//! Seams between the session orchestrator and a hosted realtime service.

use crate::{context::ConversationContext, events::SessionEvent, tools::ToolBridge};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to realtime service: {0}")]
    Connect(String),
    #[error("Realtime protocol error: {0}")]
    Protocol(String),
    #[error("Realtime connection is closed")]
    Closed,
}

/// Everything a realtime session is started with.
pub struct SessionSetup {
    pub context: ConversationContext,
    pub instructions: String,
    pub voice: String,
    pub tools: Arc<ToolBridge>,
}

/// Opens connections to a realtime service.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimeLink>, TransportError>;
}

/// One open connection carrying one conversational session.
#[async_trait]
pub trait RealtimeLink: Send {
    /// Configures and starts the session. Events must be sent on `events` in
    /// the order the service emits them.
    async fn start(
        &mut self,
        setup: SessionSetup,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<(), TransportError>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self);
}
