//! Bearer-authenticated requests with a single silent-refresh retry.
//!
//! The first unauthorized failure triggers a token refresh when the session
//! carries a refresh token; the renewed session is persisted before the one
//! retry fires. An unauthorized retry, a failed refresh, or a missing
//! refresh token all end in forced re-authentication.

use std::future::Future;

use tracing::{debug, warn};

use super::provider::TokenRefresher;
use super::session::{AuthSession, SessionStore};
use crate::backend::BackendError;

/// Failure modes of an executed action.
#[derive(Debug, thiserror::Error)]
pub enum AuthExecuteError {
    /// The session is gone or beyond repair; the caller redirects to login.
    #[error("session expired, please log in again")]
    MustReauthenticate,
    /// A non-auth failure from the wrapped request, surfaced as-is.
    #[error(transparent)]
    Request(BackendError),
}

/// Run `op` with the session's access token, refreshing and retrying exactly
/// once on an unauthorized response. `op` receives the token and is invoked
/// at most twice.
pub async fn execute_with_refresh<T, R, S, F, Fut>(
    refresher: &R,
    sessions: &S,
    op: F,
) -> Result<T, AuthExecuteError>
where
    R: TokenRefresher + ?Sized,
    S: SessionStore + ?Sized,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let Some(session) = sessions.get() else {
        return Err(AuthExecuteError::MustReauthenticate);
    };

    match op(session.access_token.clone()).await {
        Ok(value) => Ok(value),
        Err(BackendError::Unauthorized) => {
            let Some(refresh_token) = session.refresh_token.clone() else {
                debug!("unauthorized without refresh token, clearing session");
                sessions.clear();
                return Err(AuthExecuteError::MustReauthenticate);
            };

            match refresher.refresh(&refresh_token).await {
                Ok(tokens) => {
                    let renewed = AuthSession {
                        user: session.user.clone(),
                        access_token: tokens.access_token.clone(),
                        refresh_token: Some(tokens.refresh_token),
                        expires_in: tokens.expires_in,
                    };
                    // Persist before retrying: the retry must observe the
                    // renewed session even if it fails.
                    sessions.set(renewed);

                    match op(tokens.access_token).await {
                        Ok(value) => Ok(value),
                        // A second unauthorized is final; no second refresh.
                        Err(BackendError::Unauthorized) => {
                            Err(AuthExecuteError::MustReauthenticate)
                        }
                        Err(other) => Err(AuthExecuteError::Request(other)),
                    }
                }
                Err(err) => {
                    warn!(%err, "token refresh failed, clearing session");
                    sessions.clear();
                    Err(AuthExecuteError::MustReauthenticate)
                }
            }
        }
        Err(other) => Err(AuthExecuteError::Request(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{ProviderError, TokenSet};
    use crate::auth::session::{InMemorySessionStore, User};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session(refresh_token: Option<&str>) -> AuthSession {
        AuthSession {
            user: User {
                id: "auth0|u1".to_string(),
                email: "c@example.com".to_string(),
                phone: None,
                name: None,
                role: Some("client".to_string()),
            },
            access_token: "stale-token".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_in: Some(60),
        }
    }

    struct ScriptedRefresher {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(TokenSet {
                    access_token: "fresh-token".to_string(),
                    refresh_token: "fresh-refresh".to_string(),
                    expires_in: Some(86400),
                })
            } else {
                Err(ProviderError::Rejected("invalid_grant".to_string()))
            }
        }
    }

    /// Fails with Unauthorized until it sees the refreshed token, recording
    /// every token it was offered.
    struct PickyOp {
        tokens_seen: Mutex<Vec<String>>,
    }

    impl PickyOp {
        fn new() -> Self {
            Self {
                tokens_seen: Mutex::new(Vec::new()),
            }
        }

        async fn call(&self, token: String) -> Result<&'static str, BackendError> {
            self.tokens_seen.lock().expect("lock").push(token.clone());
            if token == "fresh-token" {
                Ok("payload")
            } else {
                Err(BackendError::Unauthorized)
            }
        }
    }

    #[tokio::test]
    async fn refresh_then_single_retry_succeeds() {
        let refresher = ScriptedRefresher {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(Some(session(Some("rt-1"))));
        let op = PickyOp::new();

        let result = execute_with_refresh(&refresher, &store, |token| op.call(token)).await;

        assert_eq!(result.expect("succeeds after refresh"), "payload");
        let seen = op.tokens_seen.lock().expect("lock").clone();
        assert_eq!(seen, vec!["stale-token", "fresh-token"]);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // Session store was updated with the new tokens.
        let stored = store.get().expect("session survives");
        assert_eq!(stored.access_token, "fresh-token");
        assert_eq!(stored.refresh_token.as_deref(), Some("fresh-refresh"));
    }

    #[tokio::test]
    async fn failed_refresh_clears_session_without_retry() {
        let refresher = ScriptedRefresher {
            succeed: false,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(Some(session(Some("rt-1"))));
        let op = PickyOp::new();

        let result = execute_with_refresh(&refresher, &store, |token| op.call(token)).await;

        assert!(matches!(result, Err(AuthExecuteError::MustReauthenticate)));
        assert_eq!(op.tokens_seen.lock().expect("lock").len(), 1);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_forces_reauthentication() {
        let refresher = ScriptedRefresher {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(Some(session(None)));
        let op = PickyOp::new();

        let result = execute_with_refresh(&refresher, &store, |token| op.call(token)).await;

        assert!(matches!(result, Err(AuthExecuteError::MustReauthenticate)));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn unauthorized_retry_is_final() {
        let refresher = ScriptedRefresher {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(Some(session(Some("rt-1"))));
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = execute_with_refresh(&refresher, &store, |_token| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::Unauthorized) }
        })
        .await;

        assert!(matches!(result, Err(AuthExecuteError::MustReauthenticate)));
        // At most two wrapped requests and exactly one refresh.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_auth_failures_surface_without_refresh() {
        let refresher = ScriptedRefresher {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(Some(session(Some("rt-1"))));

        let result: Result<(), _> = execute_with_refresh(&refresher, &store, |_token| async {
            Err(BackendError::NotFound)
        })
        .await;

        assert!(matches!(
            result,
            Err(AuthExecuteError::Request(BackendError::NotFound))
        ));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_session_is_immediately_unauthorized() {
        let refresher = ScriptedRefresher {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        let store = InMemorySessionStore::new(None);

        let result: Result<(), _> =
            execute_with_refresh(&refresher, &store, |_token| async { Ok(()) }).await;

        assert!(matches!(result, Err(AuthExecuteError::MustReauthenticate)));
    }
}
