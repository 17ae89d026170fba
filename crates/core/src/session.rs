//! Session Orchestrator
//!
//! Drives one conversational session from connect to teardown:
//!
//! 1. Seeds the conversation context from the persona.
//! 2. Starts the vehicle tool bridge.
//! 3. Opens the realtime transport under a [`TransportLease`], which is
//!    released exactly once whichever way the session ends.
//! 4. Starts the session with the context, instructions and tools bound.
//! 5. Forwards session events, in order, to the event registry until the
//!    [`CompletionSignal`] settles or shutdown is requested.
//!
//! Lifecycle: `Connecting -> Active -> Closing -> Closed`, one step at a time.

use crate::{
    context::Persona,
    events::{EventRegistry, SessionEvent, SessionObserver},
    signal::{CloseReason, CompletionSignal},
    tools::{ToolBridge, VehicleTools},
    transport::{RealtimeLink, RealtimeTransport, SessionSetup, TransportError},
};
use std::{future::Future, sync::Arc};
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycleState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionLifecycleState {
    /// The only state this one may move to. `Closed` has none.
    pub fn next(self) -> Option<Self> {
        match self {
            SessionLifecycleState::Connecting => Some(SessionLifecycleState::Active),
            SessionLifecycleState::Active => Some(SessionLifecycleState::Closing),
            SessionLifecycleState::Closing => Some(SessionLifecycleState::Closed),
            SessionLifecycleState::Closed => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to start vehicle tools: {0}")]
    Tools(#[source] anyhow::Error),
    #[error("Transport connection failed: {0}")]
    Connect(#[source] TransportError),
    #[error("Session start failed: {0}")]
    Start(#[source] TransportError),
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub close_reason: CloseReason,
    pub events_observed: usize,
}

/// Exclusive hold on an open realtime link.
///
/// [`release`](Self::release) closes the link the first time and does
/// nothing afterwards. A lease dropped without being released (an early
/// return or a panic) closes the link on a background task.
pub struct TransportLease {
    link: Option<Box<dyn RealtimeLink>>,
}

impl TransportLease {
    /// Takes ownership of an open link.
    pub fn new(link: Box<dyn RealtimeLink>) -> Self {
        Self { link: Some(link) }
    }

    pub fn link(&mut self) -> Result<&mut (dyn RealtimeLink + 'static), TransportError> {
        self.link.as_deref_mut().ok_or(TransportError::Closed)
    }

    pub async fn release(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            info!("Realtime transport released.");
        }
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            warn!("Transport lease dropped without release; closing in background.");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { link.close().await });
            }
        }
    }
}

/// Owns the lifecycle of one conversational session.
pub struct SessionOrchestrator {
    persona: Persona,
    tools: VehicleTools,
    transport: Arc<dyn RealtimeTransport>,
    completion: CompletionSignal,
    registry: EventRegistry,
    observers: Vec<Arc<dyn SessionObserver>>,
    lifecycle: watch::Sender<SessionLifecycleState>,
}

impl SessionOrchestrator {
    /// Prepares a session; nothing connects until [`run`](Self::run).
    pub fn new(
        persona: Persona,
        tools: VehicleTools,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let completion = CompletionSignal::new();
        let (lifecycle, _) = watch::channel(SessionLifecycleState::Connecting);
        Self {
            persona,
            tools,
            transport,
            registry: EventRegistry::new(completion.clone()),
            completion,
            observers: Vec::new(),
            lifecycle,
        }
    }

    /// Adds an observer that sees every event after the registry does.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Handle to the session's completion latch. Resolving it ends the session.
    pub fn completion(&self) -> CompletionSignal {
        self.completion.clone()
    }

    /// Receives every lifecycle transition of this session.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionLifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Runs the session to completion.
    ///
    /// Returns once the session has closed (or `shutdown` fired) and the
    /// transport has been released. A connect or start failure is returned
    /// as an error and leaves the lifecycle in `Connecting`.
    #[instrument(name = "session", skip_all, fields(persona = %self.persona.name))]
    pub async fn run<S>(self, shutdown: S) -> Result<SessionReport, SessionError>
    where
        S: Future<Output = ()>,
    {
        info!("Starting session");
        let context = self.persona.context();

        let tools = Arc::new(
            ToolBridge::start(self.tools)
                .await
                .map_err(SessionError::Tools)?,
        );

        let link = self
            .transport
            .connect()
            .await
            .map_err(SessionError::Connect)?;
        let mut lease = TransportLease::new(link);
        info!("Realtime transport connected.");

        // The channel exists before `start`, so no event can be missed.
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
        let setup = SessionSetup {
            context,
            instructions: self.persona.instructions.clone(),
            voice: self.persona.voice.clone(),
            tools,
        };
        let started = match lease.link() {
            Ok(link) => link.start(setup, events_tx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            lease.release().await;
            return Err(SessionError::Start(e));
        }

        advance(&self.lifecycle, SessionLifecycleState::Active);
        info!("Assistant is running.");

        tokio::pin!(shutdown);
        let mut shutdown_fired = false;
        let mut events_open = true;
        let mut events_observed = 0;

        let close_reason = loop {
            tokio::select! {
                biased;
                reason = self.completion.wait() => break reason,
                _ = &mut shutdown, if !shutdown_fired => {
                    shutdown_fired = true;
                    info!("Shutdown requested.");
                    self.completion.resolve(CloseReason::Shutdown);
                }
                event = events_rx.recv(), if events_open => match event {
                    Some(event) => {
                        events_observed += 1;
                        self.registry.dispatch(&event);
                        for observer in &self.observers {
                            observer.dispatch(&event);
                        }
                        if event.is_terminal() {
                            if let Some(reason) = self.completion.reason() {
                                break reason;
                            }
                        }
                    }
                    None => {
                        events_open = false;
                        let ended = SessionEvent::Close {
                            reason: CloseReason::TransportClosed("event stream ended".to_string()),
                        };
                        self.registry.dispatch(&ended);
                        for observer in &self.observers {
                            observer.dispatch(&ended);
                        }
                    }
                },
            }
        };

        advance(&self.lifecycle, SessionLifecycleState::Closing);
        drop(events_rx);
        lease.release().await;
        advance(&self.lifecycle, SessionLifecycleState::Closed);
        info!(reason = %close_reason, events_observed, "Session finished.");

        Ok(SessionReport {
            close_reason,
            events_observed,
        })
    }
}

fn advance(lifecycle: &watch::Sender<SessionLifecycleState>, to: SessionLifecycleState) {
    lifecycle.send_if_modified(|current| {
        if current.next() == Some(to) {
            info!(from = ?*current, to = ?to, "Session state transition");
            *current = to;
            true
        } else {
            warn!(from = ?*current, to = ?to, "Ignoring out-of-order session transition");
            false
        }
    });
}
