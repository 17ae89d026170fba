//! Session events and the registry of observers attached to a live session.

use crate::signal::{CloseReason, CompletionSignal};
use std::fmt;
use tracing::{error, info};

/// What the human participant is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Listening,
    Speaking,
    Away,
}

/// What the assistant is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserState::Listening => "listening",
            UserState::Speaking => "speaking",
            UserState::Away => "away",
        })
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentState::Initializing => "initializing",
            AgentState::Listening => "listening",
            AgentState::Thinking => "thinking",
            AgentState::Speaking => "speaking",
        })
    }
}

/// An event emitted by a live realtime session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UserStateChanged(UserState),
    AgentStateChanged(AgentState),
    InputTranscribed { transcript: String, is_final: bool },
    Error { message: String },
    /// Terminal. May arrive more than once.
    Close { reason: CloseReason },
}

impl SessionEvent {
    /// True for events that end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Close { .. })
    }
}

/// Named callbacks for every session event kind.
pub trait SessionObserver: Send + Sync {
    fn on_user_state_changed(&self, state: UserState);
    fn on_agent_state_changed(&self, state: AgentState);
    fn on_input_transcribed(&self, transcript: &str, is_final: bool);
    fn on_error(&self, message: &str);
    fn on_close(&self, reason: &CloseReason);

    /// Routes `event` to the matching named callback.
    fn dispatch(&self, event: &SessionEvent) {
        match event {
            SessionEvent::UserStateChanged(state) => self.on_user_state_changed(*state),
            SessionEvent::AgentStateChanged(state) => self.on_agent_state_changed(*state),
            SessionEvent::InputTranscribed {
                transcript,
                is_final,
            } => self.on_input_transcribed(transcript, *is_final),
            SessionEvent::Error { message } => self.on_error(message),
            SessionEvent::Close { reason } => self.on_close(reason),
        }
    }
}

/// Logs every event and settles the session's [`CompletionSignal`] on close.
#[derive(Clone, Debug)]
pub struct EventRegistry {
    completion: CompletionSignal,
}

impl EventRegistry {
    /// A registry that settles `completion` on the first close event.
    pub fn new(completion: CompletionSignal) -> Self {
        Self { completion }
    }
}

impl SessionObserver for EventRegistry {
    fn on_user_state_changed(&self, state: UserState) {
        info!(%state, "User state changed");
    }

    fn on_agent_state_changed(&self, state: AgentState) {
        info!(%state, "Agent state changed");
    }

    fn on_input_transcribed(&self, transcript: &str, is_final: bool) {
        let transcript = transcript.trim();
        if !transcript.is_empty() {
            info!(%transcript, is_final, "User said");
        }
    }

    fn on_error(&self, message: &str) {
        error!(%message, "Session error");
    }

    fn on_close(&self, reason: &CloseReason) {
        if self.completion.resolve(reason.clone()) {
            info!(%reason, "Session closed");
        } else {
            info!(%reason, "Session already closed; ignoring repeated close");
        }
    }
}
