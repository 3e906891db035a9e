use axum::http::{header, HeaderMap};
use leadflow::auth::{
    clear_cookie_header, session_from_cookie_header, set_cookie_header, AuthSession, SessionStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Cookie signing material and hardening flags shared by every handler.
#[derive(Clone)]
pub(crate) struct CookieSettings {
    pub(crate) key: Arc<Vec<u8>>,
    pub(crate) secure: bool,
}

impl CookieSettings {
    pub(crate) fn new(secret: &str, secure: bool) -> Self {
        Self {
            key: Arc::new(secret.as_bytes().to_vec()),
            secure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SessionChange {
    Unchanged,
    Set(AuthSession),
    Cleared,
}

/// Per-request session store backed by the request's cookie. Mutations made
/// during the request (a silent token refresh, a forced logout) are recorded
/// so the response can emit the matching `Set-Cookie`.
pub(crate) struct RequestSessionStore {
    initial: Option<AuthSession>,
    change: Mutex<SessionChange>,
}

impl RequestSessionStore {
    pub(crate) fn from_headers(headers: &HeaderMap, key: &[u8]) -> Self {
        let initial = headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|cookies| session_from_cookie_header(cookies, key));
        Self {
            initial,
            change: Mutex::new(SessionChange::Unchanged),
        }
    }

    /// `Set-Cookie` value to attach to the response, if the session changed.
    pub(crate) fn into_set_cookie(self, cookies: &CookieSettings) -> Option<String> {
        match self.change.into_inner().expect("session mutex poisoned") {
            SessionChange::Unchanged => None,
            SessionChange::Set(session) => {
                Some(set_cookie_header(&session, &cookies.key, cookies.secure))
            }
            SessionChange::Cleared => Some(clear_cookie_header()),
        }
    }
}

impl SessionStore for RequestSessionStore {
    fn get(&self) -> Option<AuthSession> {
        match &*self.change.lock().expect("session mutex poisoned") {
            SessionChange::Unchanged => self.initial.clone(),
            SessionChange::Set(session) => Some(session.clone()),
            SessionChange::Cleared => None,
        }
    }

    fn set(&self, session: AuthSession) {
        *self.change.lock().expect("session mutex poisoned") = SessionChange::Set(session);
    }

    fn clear(&self) {
        *self.change.lock().expect("session mutex poisoned") = SessionChange::Cleared;
    }
}

/// Caller network address used for rate-limit keying, taken from proxy
/// headers since the service sits behind an edge.
pub(crate) fn client_addr(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let connecting = headers
        .get("cf-connecting-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or(connecting)
        .unwrap_or("unknown")
        .to_string()
}
