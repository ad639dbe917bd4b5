//! Q&A conversation about a single uploaded invoice image.
//!
//! The session id is the only thing kept between runs. It lives in a [`SessionStore`]
//! under [`CHAT_SESSION_KEY`]; the transcript itself is owned by the service and fetched
//! back on start.

use crate::error::{ExtractError, Result};
use crate::models::chat::{GREETING, PROCESSING_NOTICE, RESET_NOTICE, WELCOME_BACK};
use crate::models::{ChatMessage, Conversation, FileHandle, Speaker};
use crate::services::ChatService;
use crate::session::{SessionContext, SessionStore, CHAT_SESSION_KEY};
use std::path::Path;
use tracing::{debug, info, warn};

/// Largest image the chat flow will send.
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    NoImage,
    ImageLoaded,
}

pub struct ChatSession<C, St> {
    service: C,
    store: St,
    context: SessionContext,
    conversation: Conversation,
    image_name: Option<String>,
    image_description: Option<String>,
    image_url: Option<String>,
    suggested_questions: Vec<String>,
}

impl<C: ChatService, St: SessionStore> ChatSession<C, St> {
    /// Resumes the stored session, or starts a new one with the greeting.
    pub fn start(service: C, store: St) -> Result<Self> {
        let (context, created) = store.load_or_create(CHAT_SESSION_KEY)?;
        let mut session = Self {
            service,
            store,
            context,
            conversation: Conversation::default(),
            image_name: None,
            image_description: None,
            image_url: None,
            suggested_questions: Vec::new(),
        };

        if created {
            info!(session_id = %session.context.session_id, "started new chat session");
            session.conversation = Conversation::starting_with(ChatMessage::bot(GREETING));
            return Ok(session);
        }

        match session.service.get_conversation(&session.context.session_id) {
            Ok(snapshot) if !snapshot.history.is_empty() => {
                info!(
                    session_id = %session.context.session_id,
                    messages = snapshot.history.len(),
                    "resumed chat session"
                );
                session.conversation = Conversation::from_history(snapshot.history);
                session.image_description = snapshot.image_description.filter(|d| !d.is_empty());
                session.image_url = snapshot.image_url.filter(|u| !u.is_empty());
                session.suggested_questions = snapshot.suggested_questions.unwrap_or_default();
            }
            Ok(_) => {
                session.conversation = Conversation::starting_with(ChatMessage::bot(WELCOME_BACK));
            }
            Err(e) => {
                warn!(error = %e, "could not fetch previous conversation");
                session.conversation = Conversation::starting_with(ChatMessage::bot(GREETING));
            }
        }
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.context.session_id
    }

    pub fn state(&self) -> ChatState {
        if self.image_description.is_some() || self.image_url.is_some() {
            ChatState::ImageLoaded
        } else {
            ChatState::NoImage
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    pub fn image_name(&self) -> Option<&str> {
        self.image_name.as_deref()
    }

    pub fn image_description(&self) -> Option<&str> {
        self.image_description.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn suggested_questions(&self) -> &[String] {
        &self.suggested_questions
    }

    fn adopt_session_id(&mut self, session_id: String) -> Result<()> {
        if session_id != self.context.session_id {
            debug!(old = %self.context.session_id, new = %session_id, "service issued a new session id");
        }
        self.context.replace_id(session_id);
        self.store.save(CHAT_SESSION_KEY, &self.context)
    }

    pub fn upload_image_path(&mut self, path: &Path) -> Result<()> {
        let image = FileHandle::from_path(path)?;
        self.upload_image(&image)
    }

    /// Sends one image for analysis. Oversized images never leave the client and leave
    /// the transcript untouched.
    pub fn upload_image(&mut self, image: &FileHandle) -> Result<()> {
        if image.size > MAX_IMAGE_BYTES {
            return Err(ExtractError::Validation(
                "File size exceeds 10MB limit".to_string(),
            ));
        }

        self.conversation
            .push(ChatMessage::new(Speaker::System, PROCESSING_NOTICE));
        match self.service.upload_image(image, &self.context.session_id) {
            Ok(analysis) => {
                info!(image = %image.name, session_id = %analysis.session_id, "image analyzed");
                self.conversation.push(ChatMessage::bot(format!(
                    "I've analyzed your invoice image. Here's what I found:\n\n{}",
                    analysis.description
                )));
                self.image_name = Some(image.name.clone());
                self.image_description = Some(analysis.description);
                self.suggested_questions = analysis.suggested_questions;
                if !analysis.session_id.is_empty() {
                    self.adopt_session_id(analysis.session_id)?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, image = %image.name, "image analysis failed");
                let text = match &e {
                    ExtractError::Service(msg) => {
                        format!("I encountered an error analyzing your image: {}", msg)
                    }
                    other => format!("I encountered an error: {}. Please try again.", other),
                };
                self.conversation.push(ChatMessage::error(text));
                Err(e)
            }
        }
    }

    /// Sends one question. Returns `Ok(false)` when the question is blank and nothing was sent.
    pub fn ask(&mut self, question: &str) -> Result<bool> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(false);
        }

        self.conversation
            .push(ChatMessage::new(Speaker::User, question));
        match self.service.ask(question, &self.context.session_id) {
            Ok(reply) => {
                self.conversation.push(ChatMessage::bot(reply.response));
                if let Some(questions) = reply.suggested_questions.filter(|q| !q.is_empty()) {
                    self.suggested_questions = questions;
                }
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "chat turn failed");
                let text = match &e {
                    ExtractError::Service(msg) => format!("Sorry, I encountered an error: {}", msg),
                    other => format!("Sorry, I couldn't process your request: {}", other),
                };
                self.conversation.push(ChatMessage::error(text));
                Err(e)
            }
        }
    }

    /// Asks the `number`-th suggested question (1-based).
    pub fn ask_suggested(&mut self, number: usize) -> Result<bool> {
        let question = number
            .checked_sub(1)
            .and_then(|i| self.suggested_questions.get(i))
            .cloned()
            .ok_or_else(|| {
                ExtractError::Validation(format!(
                    "No suggested question {} ({} available)",
                    number,
                    self.suggested_questions.len()
                ))
            })?;
        self.ask(&question)
    }

    /// Discards the conversation and starts over under a new session id.
    ///
    /// An error answer from the service still resets locally; only a request that never
    /// got an answer keeps the current session.
    pub fn reset(&mut self, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(ExtractError::Validation(
                "Reset requires confirmation".to_string(),
            ));
        }

        match self.service.reset_conversation(&self.context.session_id) {
            Ok(()) => {}
            Err(ExtractError::Service(msg)) => {
                warn!(error = %msg, "service rejected reset; starting over anyway");
            }
            Err(e) => {
                warn!(error = %e, "reset failed");
                self.conversation.push(ChatMessage::error(format!(
                    "Failed to reset conversation: {}",
                    e
                )));
                return Err(e);
            }
        }

        let fresh = SessionContext::generate();
        self.store.save(CHAT_SESSION_KEY, &fresh)?;
        let previous = std::mem::replace(&mut self.context, fresh);
        info!(old = %previous.session_id, new = %self.context.session_id, "chat session reset");

        self.conversation = Conversation::starting_with(ChatMessage::bot(RESET_NOTICE));
        self.suggested_questions.clear();
        self.image_name = None;
        self.image_description = None;
        self.image_url = None;
        Ok(())
    }
}
