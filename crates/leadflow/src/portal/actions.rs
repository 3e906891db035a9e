//! The action layer sitting between the HTTP handlers and the seams. Each
//! method validates its input, applies rate limiting where codes are sent,
//! and maps seam failures onto the portal's error taxonomy.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{
    execute_with_refresh, AuthExecuteError, AuthSession, IdentityProvider, ProviderError,
    SessionStore, TokenRefresher,
};
use crate::backend::{BackendApi, BackendError, ClientOption, ClientPreferences};
use crate::ratelimit::{FixedWindowLimiter, LOGIN_CODE_MAX_ATTEMPTS, LOGIN_CODE_WINDOW};
use crate::wizard::form::{
    is_valid_email, sanitize_phone_number, ApartmentType, FormData, TourType,
};

/// Portal-level failures, carrying the code and message the frontend keys on.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Unauthorized(_) => "UNAUTHORIZED",
            ActionError::Conflict(_) => "CONFLICT",
            ActionError::BadRequest(_) => "BAD_REQUEST",
            ActionError::NotFound(_) => "NOT_FOUND",
            ActionError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            ActionError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ActionError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ActionError::Unauthorized(_) => 401,
            ActionError::Conflict(_) => 409,
            ActionError::BadRequest(_) => 400,
            ActionError::NotFound(_) => 404,
            ActionError::TooManyRequests(_) => 429,
            ActionError::ServiceUnavailable(_) => 503,
            ActionError::Internal(_) => 500,
        }
    }

    fn too_many_requests() -> Self {
        ActionError::TooManyRequests(
            "Too many login attempts. Please try again in a minute.".to_string(),
        )
    }
}

impl From<AuthExecuteError> for ActionError {
    fn from(err: AuthExecuteError) -> Self {
        match err {
            AuthExecuteError::MustReauthenticate => ActionError::Unauthorized(
                "Your session has expired. Please log in again.".to_string(),
            ),
            AuthExecuteError::Request(inner) => inner.into(),
        }
    }
}

impl From<BackendError> for ActionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => ActionError::Unauthorized(
                "Your session has expired. Please log in again.".to_string(),
            ),
            BackendError::EmailExists => ActionError::Conflict(
                "This email is already registered. Please log in to your portal to update \
                 your preferences."
                    .to_string(),
            ),
            BackendError::PhoneExists => ActionError::Conflict(
                "This phone number is already registered. Please log in to your portal to \
                 update your preferences."
                    .to_string(),
            ),
            BackendError::Validation(message) => ActionError::BadRequest(message),
            BackendError::NotFound => ActionError::NotFound("Not found.".to_string()),
            BackendError::Transport(message) => {
                warn!(%message, "backend transport failure");
                ActionError::Internal("Something went wrong. Please try again.".to_string())
            }
            BackendError::Status { status } => {
                warn!(status, "unexpected backend status");
                ActionError::Internal("Something went wrong. Please try again.".to_string())
            }
        }
    }
}

impl From<ProviderError> for ActionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => ActionError::ServiceUnavailable(
                "SMS service is currently unavailable. Please try email login instead or contact support.".to_string(),
            ),
            ProviderError::Rejected(message) => ActionError::BadRequest(message),
            ProviderError::Transport(message) => {
                warn!(%message, "identity provider transport failure");
                ActionError::Internal("Something went wrong. Please try again.".to_string())
            }
            ProviderError::InvalidToken => {
                warn!("identity provider returned an unusable token");
                ActionError::Internal("Something went wrong. Please try again.".to_string())
            }
        }
    }
}

/// Wizard answers as posted by the lead-capture form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesSubmission {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
    pub neighborhood_id: String,
    pub apartment_type: ApartmentType,
    pub budget: u32,
    pub move_in_date: NaiveDate,
    pub tour_type: TourType,
    #[serde(default)]
    pub notes: Option<Vec<String>>,
    pub terms_accepted: bool,
    #[serde(default)]
    pub origin: Option<String>,
}

/// Entry point for every portal action, generic over the backend and identity
/// seams so tests can script both sides.
pub struct PortalService<B, P> {
    backend: Arc<B>,
    provider: Arc<P>,
    limiter: Arc<FixedWindowLimiter>,
}

impl<B, P> PortalService<B, P>
where
    B: BackendApi,
    P: IdentityProvider + TokenRefresher,
{
    pub fn new(backend: Arc<B>, provider: Arc<P>, limiter: Arc<FixedWindowLimiter>) -> Self {
        Self {
            backend,
            provider,
            limiter,
        }
    }

    fn check_rate_limit(&self, identity: &str, client_addr: &str) -> Result<(), ActionError> {
        let key = FixedWindowLimiter::rate_key(identity, client_addr);
        if self
            .limiter
            .allow(&key, LOGIN_CODE_MAX_ATTEMPTS, LOGIN_CODE_WINDOW)
        {
            Ok(())
        } else {
            info!(identity, "login attempt rate limited");
            Err(ActionError::too_many_requests())
        }
    }

    /// Neighborhoods offered on the wizard's first step.
    pub async fn list_neighborhoods(&self) -> Result<Vec<crate::backend::Neighborhood>, ActionError> {
        Ok(self.backend.list_neighborhoods().await?)
    }

    /// Current price range for a neighborhood and apartment size.
    pub async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<crate::wizard::price::PriceRange, ActionError> {
        Ok(self
            .backend
            .price_range(neighborhood_id, apartment_type)
            .await?)
    }

    /// Email a one-time login code.
    pub async fn send_login_code_email(
        &self,
        email: &str,
        client_addr: &str,
    ) -> Result<(), ActionError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(ActionError::BadRequest(
                "Please enter a valid email address.".to_string(),
            ));
        }
        self.check_rate_limit(email, client_addr)?;
        self.provider.send_email_code(email).await?;
        info!("login code emailed");
        Ok(())
    }

    /// Text a one-time login code. The number must already be E.164.
    pub async fn send_login_code_sms(
        &self,
        phone_number: &str,
        client_addr: &str,
    ) -> Result<(), ActionError> {
        let phone_number = sanitize_phone_number(phone_number).map_err(|_| {
            ActionError::BadRequest(
                "Please enter a valid phone number in international format.".to_string(),
            )
        })?;
        self.check_rate_limit(&phone_number, client_addr)?;
        self.provider.send_sms_code(&phone_number).await?;
        info!("login code sent via sms");
        Ok(())
    }

    /// Exchange a texted code for an authenticated session.
    pub async fn verify_sms_code(
        &self,
        phone_number: &str,
        code: &str,
        client_addr: &str,
    ) -> Result<AuthSession, ActionError> {
        let phone_number = sanitize_phone_number(phone_number).map_err(|_| {
            ActionError::BadRequest(
                "Please enter a valid phone number in international format.".to_string(),
            )
        })?;
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ActionError::BadRequest(
                "The verification code must be 6 digits.".to_string(),
            ));
        }
        self.check_rate_limit(&phone_number, client_addr)?;

        let login = self.provider.verify_sms_code(&phone_number, code).await?;
        info!(user = %login.user.id, "sms login verified");

        Ok(AuthSession {
            user: login.user,
            access_token: login.tokens.access_token,
            refresh_token: Some(login.tokens.refresh_token),
            expires_in: login.tokens.expires_in,
        })
    }

    /// Submit wizard answers as a new public client registration. Returns the
    /// client id generated for the submission.
    pub async fn submit_preferences(
        &self,
        submission: PreferencesSubmission,
    ) -> Result<Uuid, ActionError> {
        let origin = submission
            .origin
            .clone()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| "Organic".to_string());
        let form = FormData {
            neighborhood_id: Some(submission.neighborhood_id),
            neighborhood_name: None,
            apartment_type: Some(submission.apartment_type),
            budget: Some(submission.budget),
            move_in_date: Some(submission.move_in_date),
            name: Some(submission.name),
            email: submission.email,
            phone_number: Some(submission.phone_number),
            tour_type: Some(submission.tour_type),
            notes: submission.notes,
            terms_accepted: Some(submission.terms_accepted),
        };

        let payload = form
            .submission_payload(&origin)
            .map_err(|err| ActionError::BadRequest(err.to_string()))?;
        self.backend.submit_client(&payload).await?;
        info!(client = %payload.client.id, "preferences submitted");
        Ok(payload.client.id)
    }

    /// Flip an option's favorited flag, returning the new state. Reads the
    /// current state first so concurrent portals converge on the backend's
    /// view rather than a stale toggle.
    pub async fn toggle_favorite<S>(
        &self,
        sessions: &S,
        option_id: &str,
    ) -> Result<bool, ActionError>
    where
        S: SessionStore + ?Sized,
    {
        let current = execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
            self.backend.get_option(option_id, &token).await
        })
        .await?;
        let next = !current.favorited;

        execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
            self.backend.set_favorite(option_id, next, &token).await
        })
        .await?;
        Ok(next)
    }

    /// Attach client feedback to an option. The option is fetched first so a
    /// bad id surfaces as not-found before anything is written.
    pub async fn submit_feedback<S>(
        &self,
        sessions: &S,
        option_id: &str,
        feedback: &str,
    ) -> Result<(), ActionError>
    where
        S: SessionStore + ?Sized,
    {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(ActionError::BadRequest(
                "Feedback cannot be empty.".to_string(),
            ));
        }

        execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
            self.backend.get_option(option_id, &token).await
        })
        .await?;

        execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
            self.backend.set_feedback(option_id, feedback, &token).await
        })
        .await?;
        Ok(())
    }

    /// Options curated for the logged-in client.
    pub async fn list_options<S>(&self, sessions: &S) -> Result<Vec<ClientOption>, ActionError>
    where
        S: SessionStore + ?Sized,
    {
        let options =
            execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
                self.backend.list_options(&token).await
            })
            .await?;
        Ok(options)
    }

    /// Past preference submissions, newest first.
    pub async fn list_preferences<S>(
        &self,
        sessions: &S,
    ) -> Result<Vec<ClientPreferences>, ActionError>
    where
        S: SessionStore + ?Sized,
    {
        let preferences =
            execute_with_refresh(self.provider.as_ref(), sessions, |token| async move {
                self.backend.list_preferences(&token).await
            })
            .await?;
        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{InMemorySessionStore, TokenSet, User, VerifiedLogin};
    use crate::backend::Neighborhood;
    use crate::wizard::form::SubmissionPayload;
    use crate::wizard::price::PriceRange;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubBackend {
        favorited: Mutex<bool>,
        favorite_writes: Mutex<Vec<bool>>,
        submissions: AtomicUsize,
        conflict: Option<fn() -> BackendError>,
    }

    #[async_trait]
    impl BackendApi for StubBackend {
        async fn list_neighborhoods(&self) -> Result<Vec<Neighborhood>, BackendError> {
            Ok(vec![])
        }
        async fn price_range(
            &self,
            _neighborhood_id: &str,
            _apartment_type: ApartmentType,
        ) -> Result<PriceRange, BackendError> {
            Ok(PriceRange {
                min: 1800,
                max: 2400,
                available: true,
            })
        }
        async fn submit_client(&self, _payload: &SubmissionPayload) -> Result<(), BackendError> {
            if let Some(conflict) = self.conflict {
                return Err(conflict());
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn get_option(
            &self,
            option_id: &str,
            _access_token: &str,
        ) -> Result<ClientOption, BackendError> {
            Ok(ClientOption {
                id: option_id.to_string(),
                favorited: *self.favorited.lock().expect("lock"),
                name: None,
                address: None,
                feedback: None,
            })
        }
        async fn set_favorite(
            &self,
            _option_id: &str,
            favorited: bool,
            _access_token: &str,
        ) -> Result<(), BackendError> {
            *self.favorited.lock().expect("lock") = favorited;
            self.favorite_writes.lock().expect("lock").push(favorited);
            Ok(())
        }
        async fn set_feedback(
            &self,
            _option_id: &str,
            _feedback: &str,
            _access_token: &str,
        ) -> Result<(), BackendError> {
            Ok(())
        }
        async fn list_options(
            &self,
            _access_token: &str,
        ) -> Result<Vec<ClientOption>, BackendError> {
            Ok(vec![])
        }
        async fn list_preferences(
            &self,
            _access_token: &str,
        ) -> Result<Vec<ClientPreferences>, BackendError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct StubProvider {
        sms_sends: AtomicUsize,
        timeout: bool,
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn send_email_code(&self, _email: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn send_sms_code(&self, _phone_number: &str) -> Result<(), ProviderError> {
            if self.timeout {
                return Err(ProviderError::Timeout);
            }
            self.sms_sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn verify_sms_code(
            &self,
            phone_number: &str,
            _code: &str,
        ) -> Result<VerifiedLogin, ProviderError> {
            Ok(VerifiedLogin {
                user: User {
                    id: "auth0|u1".to_string(),
                    email: String::new(),
                    phone: Some(phone_number.to_string()),
                    name: None,
                    role: Some("client".to_string()),
                },
                tokens: TokenSet {
                    access_token: "at".to_string(),
                    refresh_token: "rt".to_string(),
                    expires_in: Some(86400),
                },
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for StubProvider {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
            Ok(TokenSet {
                access_token: "fresh".to_string(),
                refresh_token: "rt2".to_string(),
                expires_in: Some(86400),
            })
        }
    }

    fn service(
        backend: StubBackend,
        provider: StubProvider,
    ) -> PortalService<StubBackend, StubProvider> {
        PortalService::new(
            Arc::new(backend),
            Arc::new(provider),
            Arc::new(FixedWindowLimiter::new()),
        )
    }

    fn logged_in_store() -> InMemorySessionStore {
        InMemorySessionStore::new(Some(AuthSession {
            user: User {
                id: "auth0|u1".to_string(),
                email: "c@example.com".to_string(),
                phone: None,
                name: None,
                role: Some("client".to_string()),
            },
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_in: Some(86400),
        }))
    }

    #[tokio::test]
    async fn sixth_sms_code_in_a_minute_is_rate_limited() {
        let svc = service(StubBackend::default(), StubProvider::default());
        for _ in 0..5 {
            svc.send_login_code_sms("+15551234567", "1.2.3.4")
                .await
                .expect("within budget");
        }

        let err = svc
            .send_login_code_sms("+15551234567", "1.2.3.4")
            .await
            .expect_err("over budget");
        assert_eq!(err.code(), "TOO_MANY_REQUESTS");
        assert_eq!(err.status(), 429);
        assert_eq!(svc.provider.sms_sends.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn sms_timeout_maps_to_service_unavailable() {
        let svc = service(
            StubBackend::default(),
            StubProvider {
                timeout: true,
                ..StubProvider::default()
            },
        );
        let err = svc
            .send_login_code_sms("+15551234567", "1.2.3.4")
            .await
            .expect_err("gateway down");
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        assert_eq!(err.status(), 503);
        // The user still has a working login path; the message points there.
        assert!(err.to_string().contains("email login"));
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_before_any_send() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let err = svc
            .send_login_code_sms("555-1234", "1.2.3.4")
            .await
            .expect_err("not E.164");
        assert_eq!(err.code(), "BAD_REQUEST");
        assert_eq!(svc.provider.sms_sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verify_rejects_short_codes() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let err = svc
            .verify_sms_code("+15551234567", "123", "1.2.3.4")
            .await
            .expect_err("not six digits");
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn verify_builds_a_client_session() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let session = svc
            .verify_sms_code("+1 (555) 123-4567", "123456", "1.2.3.4")
            .await
            .expect("verified");
        assert_eq!(session.user.role.as_deref(), Some("client"));
        assert_eq!(session.refresh_token.as_deref(), Some("rt"));
        assert_eq!(session.user.phone.as_deref(), Some("+15551234567"));
    }

    #[tokio::test]
    async fn toggle_favorite_reads_then_flips() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let store = logged_in_store();

        let now_favorited = svc
            .toggle_favorite(&store, "opt-1")
            .await
            .expect("toggled");
        assert!(now_favorited);
        let again = svc
            .toggle_favorite(&store, "opt-1")
            .await
            .expect("toggled back");
        assert!(!again);
        assert_eq!(
            *svc.backend.favorite_writes.lock().expect("lock"),
            vec![true, false]
        );
    }

    #[tokio::test]
    async fn portal_actions_require_a_session() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let store = InMemorySessionStore::new(None);

        let err = svc
            .toggle_favorite(&store, "opt-1")
            .await
            .expect_err("no session");
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn duplicate_email_surfaces_as_conflict() {
        let svc = service(
            StubBackend {
                conflict: Some(|| BackendError::EmailExists),
                ..StubBackend::default()
            },
            StubProvider::default(),
        );
        let err = svc
            .submit_preferences(sample_submission())
            .await
            .expect_err("conflict");
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.to_string().contains("email is already registered"));
    }

    #[tokio::test]
    async fn submission_defaults_the_origin() {
        let svc = service(StubBackend::default(), StubProvider::default());
        svc.submit_preferences(sample_submission())
            .await
            .expect("accepted");
        assert_eq!(svc.backend.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_feedback_is_rejected() {
        let svc = service(StubBackend::default(), StubProvider::default());
        let store = logged_in_store();
        let err = svc
            .submit_feedback(&store, "opt-1", "   ")
            .await
            .expect_err("blank feedback");
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    fn sample_submission() -> PreferencesSubmission {
        PreferencesSubmission {
            name: "Jordan Reyes".to_string(),
            email: Some("jordan@example.com".to_string()),
            phone_number: "+1 (555) 123-4567".to_string(),
            neighborhood_id: "d1".to_string(),
            apartment_type: ApartmentType::OneBed,
            budget: 2000,
            move_in_date: NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date"),
            tour_type: TourType::OnSite,
            notes: None,
            terms_accepted: true,
            origin: None,
        }
    }
}
