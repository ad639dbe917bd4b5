use crate::error::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key under which the chat flow keeps its session.
pub const CHAT_SESSION_KEY: &str = "chat";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_HALF_LEN: usize = 13;

/// The one durable handle of the client: which server-side conversation we belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn generate() -> Self {
        Self::new(generate_session_id())
    }

    /// Adopts an id handed out by the service, keeping the creation time.
    pub fn replace_id(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
        self.updated_at = Utc::now();
    }
}

/// Where session contexts live between runs.
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<SessionContext>>;
    fn save(&self, key: &str, context: &SessionContext) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;

    /// Returns the stored context, or creates and stores a fresh one. The flag is true
    /// when the context was just created.
    fn load_or_create(&self, key: &str) -> Result<(SessionContext, bool)> {
        if let Some(existing) = self.load(key)? {
            return Ok((existing, false));
        }
        let fresh = SessionContext::generate();
        self.save(key, &fresh)?;
        Ok((fresh, true))
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self, key: &str) -> Result<Option<SessionContext>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, context: &SessionContext) -> Result<()> {
        (**self).save(key, context)
    }

    fn clear(&self, key: &str) -> Result<()> {
        (**self).clear(key)
    }
}

/// Process-local store, for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, SessionContext>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Result<Option<SessionContext>> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn save(&self, key: &str, context: &SessionContext) -> Result<()> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), context.clone());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
        Ok(())
    }
}

/// Base-36 digits of a random fraction in `[0, 1)`, at most `MAX_HALF_LEN` of them.
fn random_base36_fraction<R: Rng>(rng: &mut R) -> String {
    loop {
        let mut x: f64 = rng.gen();
        let mut out = String::with_capacity(MAX_HALF_LEN);
        while x > 0.0 && out.len() < MAX_HALF_LEN {
            x *= 36.0;
            let digit = x.floor();
            out.push(BASE36[digit as usize % 36] as char);
            x -= digit;
        }
        if !out.is_empty() {
            return out;
        }
    }
}

/// Casual collision-avoidance key for chat conversations: two random base-36 strings
/// glued together. Not suitable for anything security related.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let first = random_base36_fraction(&mut rng);
    let second = random_base36_fraction(&mut rng);
    format!("{}{}", first, second)
}
