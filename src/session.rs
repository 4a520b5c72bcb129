// ABOUTME: Identity facts supplied by the session provider
// ABOUTME: The controller only reads these, it never signs anyone in or out

use std::sync::{Arc, RwLock};

/// Who is using the client right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// The provider has not answered yet.
    Pending,
    Anonymous,
    Authenticated { requester_id: String },
}

impl Session {
    pub fn requester_id(&self) -> Option<&str> {
        match self {
            Session::Authenticated { requester_id } => Some(requester_id),
            _ => None,
        }
    }

    pub fn from_user_id(user_id: Option<String>) -> Self {
        match user_id {
            Some(id) if !id.trim().is_empty() => Session::Authenticated {
                requester_id: id.trim().to_string(),
            },
            _ => Session::Anonymous,
        }
    }
}

pub trait SessionProvider: Send + Sync {
    fn session(&self) -> Session;
}

/// Session held in memory; the CLI fills it from configuration.
#[derive(Debug, Clone)]
pub struct StaticSession {
    current: Arc<RwLock<Session>>,
}

impl StaticSession {
    pub fn new(session: Session) -> Self {
        Self {
            current: Arc::new(RwLock::new(session)),
        }
    }

    pub fn set(&self, session: Session) {
        match self.current.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

impl SessionProvider for StaticSession {
    fn session(&self) -> Session {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
