use serde::{Deserialize, Serialize};
use std::fmt;

pub const GREETING: &str = "Hello! I'm your invoice analysis assistant. Upload an invoice image, and I'll help you extract key information.";
pub const WELCOME_BACK: &str =
    "Welcome back! Upload a new invoice image or continue our conversation.";
pub const RESET_NOTICE: &str =
    "I've reset our conversation. You can upload a new invoice image or start a fresh chat.";
pub const PROCESSING_NOTICE: &str = "Processing your invoice image...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
    System,
    Error,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Speaker::User => "you",
            Speaker::Bot => "assistant",
            Speaker::System => "system",
            Speaker::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub speaker: Speaker,
    pub message: String,
}

impl ChatMessage {
    pub fn new(speaker: Speaker, message: impl Into<String>) -> Self {
        Self {
            speaker,
            message: message.into(),
        }
    }

    pub fn bot(message: impl Into<String>) -> Self {
        Self::new(Speaker::Bot, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Speaker::Error, message)
    }
}

/// Transcript of one chat session. Messages are only ever appended; a reset starts a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn starting_with(message: ChatMessage) -> Self {
        Self {
            messages: vec![message],
        }
    }

    pub fn from_history(history: Vec<ChatMessage>) -> Self {
        Self { messages: history }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
