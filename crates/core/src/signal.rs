//! One-shot completion latch for a conversational session.

use std::{fmt, sync::Arc};
use tokio::sync::watch;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The participant or the hosting side closed the session on purpose.
    ClientInitiated,
    /// The realtime transport went away, with the peer's reason if any.
    TransportClosed(String),
    /// The session could not continue.
    Error(String),
    /// The process was asked to stop.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientInitiated => f.write_str("client initiated"),
            CloseReason::TransportClosed(reason) if reason.is_empty() => {
                f.write_str("transport closed")
            }
            CloseReason::TransportClosed(reason) => write!(f, "transport closed: {}", reason),
            CloseReason::Error(message) => write!(f, "error: {}", message),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Marks a session as finished. Resolving is idempotent: the first reason
/// sticks and later attempts are ignored. Clones share the same latch.
#[derive(Clone, Debug)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    /// An unresolved latch.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Settles the latch. Returns `true` only for the call that settled it.
    pub fn resolve(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// True once any reason has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The reason the latch was settled with, if it has been.
    pub fn reason(&self) -> Option<CloseReason> {
        self.tx.borrow().clone()
    }

    /// Waits until the latch is settled and returns the first reason.
    pub async fn wait(&self) -> CloseReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            // The sender lives as long as `self`, so this cannot fail.
            if rx.changed().await.is_err() {
                return CloseReason::Error("completion signal dropped".to_string());
            }
        }
    }
}
