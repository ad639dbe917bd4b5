mod common;

use common::{handle, FakeChat};
use invoice_extract_lib::chat::{ChatSession, ChatState, MAX_IMAGE_BYTES};
use invoice_extract_lib::error::ExtractError;
use invoice_extract_lib::models::chat::{GREETING, PROCESSING_NOTICE, RESET_NOTICE, WELCOME_BACK};
use invoice_extract_lib::models::{ChatMessage, Speaker};
use invoice_extract_lib::session::{MemorySessionStore, SessionContext, SessionStore, CHAT_SESSION_KEY};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory store whose writes can be switched off.
#[derive(Default)]
struct ReadOnlyAfterStart {
    inner: MemorySessionStore,
    reject_saves: AtomicBool,
}

impl SessionStore for ReadOnlyAfterStart {
    fn load(&self, key: &str) -> invoice_extract_lib::error::Result<Option<SessionContext>> {
        self.inner.load(key)
    }
    fn save(&self, key: &str, context: &SessionContext) -> invoice_extract_lib::error::Result<()> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
        }
        self.inner.save(key, context)
    }
    fn clear(&self, key: &str) -> invoice_extract_lib::error::Result<()> {
        self.inner.clear(key)
    }
}

fn stored(session_id: &str) -> Arc<MemorySessionStore> {
    let store = Arc::new(MemorySessionStore::new());
    store.save(CHAT_SESSION_KEY, &SessionContext::new(session_id)).unwrap();
    store
}

fn stored_id(store: &MemorySessionStore) -> String {
    store.load(CHAT_SESSION_KEY).unwrap().unwrap().session_id
}

#[test]
fn first_start_greets_and_persists_a_new_id() {
    let service = FakeChat::default();
    let store = Arc::new(MemorySessionStore::new());
    let session = ChatSession::start(service.clone(), store.clone()).unwrap();

    assert_eq!(session.messages(), &[ChatMessage::bot(GREETING)]);
    assert_eq!(session.state(), ChatState::NoImage);
    assert_eq!(stored_id(&store), session.session_id());
    assert!(service.calls().is_empty());
}

#[test]
fn resume_restores_history() {
    let service = FakeChat {
        history: vec![
            ChatMessage::new(Speaker::User, "What is the total?"),
            ChatMessage::bot("The total is 99.50"),
        ],
        description: "Invoice INV-1 from ACME".into(),
        suggestions: vec!["Who is the vendor?".into()],
        ..Default::default()
    };
    let session = ChatSession::start(service.clone(), stored("s-1")).unwrap();

    assert_eq!(service.calls(), vec!["get_conversation s-1"]);
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.image_description(), Some("Invoice INV-1 from ACME"));
    assert_eq!(session.suggested_questions(), &["Who is the vendor?".to_string()]);
    assert_eq!(session.state(), ChatState::ImageLoaded);
}

#[test]
fn resume_with_empty_history_welcomes_back() {
    let session = ChatSession::start(FakeChat::default(), stored("s-1")).unwrap();
    assert_eq!(session.messages(), &[ChatMessage::bot(WELCOME_BACK)]);
    assert_eq!(session.session_id(), "s-1");
}

#[test]
fn resume_failure_falls_back_to_greeting() {
    let service = FakeChat::default();
    service.fail("get_conversation", ExtractError::Transport("Connection refused".into()));
    let session = ChatSession::start(service, stored("s-1")).unwrap();
    assert_eq!(session.messages(), &[ChatMessage::bot(GREETING)]);
    assert_eq!(session.session_id(), "s-1");
}

#[test]
fn oversized_image_never_leaves_the_client() {
    let service = FakeChat::default();
    let mut session = ChatSession::start(service.clone(), stored("s-1")).unwrap();
    let before = session.messages().to_vec();

    let err = session.upload_image(&handle("huge.png", MAX_IMAGE_BYTES + 1)).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(session.messages(), before.as_slice());
    assert_eq!(service.calls(), vec!["get_conversation s-1"]);
}

#[test]
fn upload_adopts_the_service_session_id() {
    let service = FakeChat {
        issued_session_id: "srv-42".into(),
        description: "Invoice INV-9, total 10.00".into(),
        suggestions: vec!["What is the due date?".into(), "Who is the buyer?".into()],
        ..Default::default()
    };
    let store = stored("s-1");
    let mut session = ChatSession::start(service.clone(), store.clone()).unwrap();
    session.upload_image(&handle("inv.png", 2048)).unwrap();

    assert_eq!(service.calls().last().unwrap(), "upload_image inv.png s-1");
    assert_eq!(session.session_id(), "srv-42");
    assert_eq!(stored_id(&store), "srv-42");
    assert_eq!(session.state(), ChatState::ImageLoaded);
    assert_eq!(session.image_name(), Some("inv.png"));

    let tail = &session.messages()[session.messages().len() - 2..];
    assert_eq!(tail[0], ChatMessage::new(Speaker::System, PROCESSING_NOTICE));
    assert_eq!(
        tail[1],
        ChatMessage::bot("I've analyzed your invoice image. Here's what I found:\n\nInvoice INV-9, total 10.00")
    );
    assert_eq!(session.suggested_questions().len(), 2);
}

#[test]
fn upload_failures_are_reported_in_the_transcript() {
    let service = FakeChat::default();
    service.fail("upload_image", ExtractError::Service("Unsupported image format".into()));
    let mut session = ChatSession::start(service, stored("s-1")).unwrap();

    assert!(session.upload_image(&handle("inv.png", 10)).is_err());
    let last = session.messages().last().unwrap();
    assert_eq!(last.speaker, Speaker::Error);
    assert_eq!(last.message, "I encountered an error analyzing your image: Unsupported image format");
    assert_eq!(session.state(), ChatState::NoImage);
    assert_eq!(session.session_id(), "s-1");
}

#[test]
fn blank_questions_are_ignored() {
    let service = FakeChat::default();
    let mut session = ChatSession::start(service.clone(), stored("s-1")).unwrap();
    let before = session.messages().len();
    assert!(!session.ask("   ").unwrap());
    assert_eq!(session.messages().len(), before);
    assert_eq!(service.calls().len(), 1);
}

#[test]
fn questions_append_user_and_bot_turns() {
    let service = FakeChat {
        suggestions: vec!["What is the total?".into()],
        description: "An invoice".into(),
        history: vec![ChatMessage::bot("hi")],
        reply_suggestions: Some(vec![]),
        ..Default::default()
    };
    let mut session = ChatSession::start(service.clone(), stored("s-1")).unwrap();

    assert!(session.ask("  Who issued it? ").unwrap());
    let messages = session.messages();
    assert_eq!(messages[messages.len() - 2], ChatMessage::new(Speaker::User, "Who issued it?"));
    assert_eq!(messages[messages.len() - 1], ChatMessage::bot("Answer to: Who issued it?"));
    // An empty suggestion list in a reply keeps the current suggestions.
    assert_eq!(session.suggested_questions(), &["What is the total?".to_string()]);

    assert!(session.ask_suggested(1).unwrap());
    assert_eq!(service.calls().last().unwrap(), "ask s-1 What is the total?");
    assert!(session.ask_suggested(0).unwrap_err().is_validation());
    assert!(session.ask_suggested(2).unwrap_err().is_validation());
}

#[test]
fn failed_question_is_reported() {
    let service = FakeChat::default();
    service.fail("ask", ExtractError::Transport("Request timed out".into()));
    let mut session = ChatSession::start(service, stored("s-1")).unwrap();
    assert!(session.ask("Total?").is_err());
    let last = session.messages().last().unwrap();
    assert_eq!(last.speaker, Speaker::Error);
    assert_eq!(last.message, "Sorry, I couldn't process your request: Request timed out");
}

#[test]
fn reset_starts_a_new_persisted_session() {
    let service = FakeChat {
        history: vec![ChatMessage::bot("hi")],
        description: "An invoice".into(),
        suggestions: vec!["Total?".into()],
        ..Default::default()
    };
    let store = stored("s-1");
    let mut session = ChatSession::start(service.clone(), store.clone()).unwrap();

    assert!(session.reset(false).unwrap_err().is_validation());
    assert_eq!(service.calls().len(), 1);

    session.reset(true).unwrap();
    assert_eq!(service.calls().last().unwrap(), "reset s-1");
    assert_ne!(session.session_id(), "s-1");
    assert_eq!(stored_id(&store), session.session_id());
    assert_eq!(session.messages(), &[ChatMessage::bot(RESET_NOTICE)]);
    assert_eq!(session.state(), ChatState::NoImage);
    assert!(session.suggested_questions().is_empty());
}

#[test]
fn reset_transport_failure_keeps_the_session() {
    let service = FakeChat::default();
    service.fail("reset", ExtractError::Transport("Connection refused".into()));
    let store = stored("s-1");
    let mut session = ChatSession::start(service, store.clone()).unwrap();

    assert!(session.reset(true).is_err());
    assert_eq!(session.session_id(), "s-1");
    assert_eq!(stored_id(&store), "s-1");
    assert_eq!(
        session.messages().last().unwrap().message,
        "Failed to reset conversation: Connection refused"
    );
}

#[test]
fn reset_rejected_by_service_still_starts_over() {
    let service = FakeChat::default();
    service.fail("reset", ExtractError::Service("Unknown session".into()));
    let mut session = ChatSession::start(service, stored("s-1")).unwrap();
    session.reset(true).unwrap();
    assert_ne!(session.session_id(), "s-1");
    assert_eq!(session.messages(), &[ChatMessage::bot(RESET_NOTICE)]);
}

#[test]
fn reset_keeps_the_old_session_when_it_cannot_be_stored() {
    let service = FakeChat {
        history: vec![ChatMessage::bot("hi")],
        description: "An invoice".into(),
        suggestions: vec!["Total?".into()],
        ..Default::default()
    };
    let store = Arc::new(ReadOnlyAfterStart::default());
    store.save(CHAT_SESSION_KEY, &SessionContext::new("s-1")).unwrap();
    let mut session = ChatSession::start(service.clone(), store.clone()).unwrap();
    let before = session.messages().to_vec();

    store.reject_saves.store(true, Ordering::SeqCst);
    let err = session.reset(true).unwrap_err();
    assert!(matches!(err, ExtractError::Io { .. }));

    assert_eq!(service.calls().last().unwrap(), "reset s-1");
    assert_eq!(session.session_id(), "s-1");
    assert_eq!(store.load(CHAT_SESSION_KEY).unwrap().unwrap().session_id, "s-1");
    assert_eq!(session.messages(), before.as_slice());
    assert_eq!(session.suggested_questions(), &["Total?".to_string()]);
}
