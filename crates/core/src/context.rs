//! Conversation context and the persona that seeds it.

use serde::{Deserialize, Serialize};

/// Author of a [`ChatMessage`], serialized in lower case as the realtime
/// protocol expects.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// The plain-text body.
    pub content: String,
}

/// Ordered message history handed to the realtime model at session start.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    /// A context holding exactly one system message.
    pub fn seeded(system_prompt: impl Into<String>) -> Self {
        let mut context = Self::default();
        context.push(Role::System, system_prompt);
        context
    }

    /// Appends a message after the existing history.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Who the assistant is: the system prompt that opens the conversation, the
/// shorter instructions bound to the realtime session, and the voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    /// Short identifier used in logs.
    pub name: String,
    /// Opening system message of the conversation.
    pub system_prompt: String,
    /// Session-level instructions sent with the realtime configuration.
    pub instructions: String,
    /// Provider voice name.
    pub voice: String,
}

impl Persona {
    /// A fresh context seeded with this persona's system prompt.
    pub fn context(&self) -> ConversationContext {
        ConversationContext::seeded(self.system_prompt.clone())
    }
}
