use serde::{Deserialize, Serialize};

/// Authenticated portal user, as asserted by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Cookie-backed session. Only server-side request handlers create, replace,
/// or delete one; it is never held as long-lived client state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: User,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Session access seam. In the HTTP service this wraps the request's cookie
/// jar; tests substitute an in-memory store.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Option<AuthSession>;
    fn set(&self, session: AuthSession);
    fn clear(&self);
}

/// Mutex-backed store for tests and single-flow tooling.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    slot: std::sync::Mutex<Option<AuthSession>>,
}

impl InMemorySessionStore {
    pub fn new(initial: Option<AuthSession>) -> Self {
        Self {
            slot: std::sync::Mutex::new(initial),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self) -> Option<AuthSession> {
        self.slot.lock().expect("session mutex poisoned").clone()
    }

    fn set(&self, session: AuthSession) {
        *self.slot.lock().expect("session mutex poisoned") = Some(session);
    }

    fn clear(&self) {
        *self.slot.lock().expect("session mutex poisoned") = None;
    }
}
