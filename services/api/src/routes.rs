use crate::infra::{client_addr, AppState, CookieSettings, RequestSessionStore};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use leadflow::auth::{clear_cookie_header, set_cookie_header, IdentityProvider, TokenRefresher};
use leadflow::backend::BackendApi;
use leadflow::portal::{ActionError, PortalService, PreferencesSubmission};
use leadflow::wizard::form::ApartmentType;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Per-router state: the action layer plus cookie material.
pub(crate) struct PortalState<B, P> {
    pub(crate) portal: Arc<PortalService<B, P>>,
    pub(crate) cookies: CookieSettings,
}

impl<B, P> Clone for PortalState<B, P> {
    fn clone(&self) -> Self {
        Self {
            portal: self.portal.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

pub(crate) fn with_portal_routes<B, P>(state: PortalState<B, P>) -> Router
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/neighborhoods", get(neighborhoods_endpoint))
        .route("/api/v1/apartments/price-range", get(price_range_endpoint))
        .route("/api/submit-preferences", post(submit_preferences_endpoint))
        .route("/api/auth/login", post(login_email_endpoint))
        .route("/api/auth/login-sms", post(login_sms_endpoint))
        .route("/api/auth/verify-code-sms", post(verify_sms_endpoint))
        .route("/api/auth/logout", post(logout_endpoint))
        .route("/api/v1/clients/me/options", get(list_options_endpoint))
        .route(
            "/api/v1/clients/me/preferences",
            get(list_preferences_endpoint),
        )
        .route(
            "/api/v1/clients/me/options/:id/favorite",
            post(toggle_favorite_endpoint),
        )
        .route(
            "/api/v1/clients/me/options/:id/feedback",
            post(submit_feedback_endpoint),
        )
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn action_error_response(err: ActionError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(json!({
        "error": { "code": err.code(), "message": err.to_string() }
    }));
    (status, body).into_response()
}

/// Attach the session cookie produced during the request, if any.
fn with_session_cookie(
    mut response: Response,
    store: RequestSessionStore,
    cookies: &CookieSettings,
) -> Response {
    if let Some(cookie) = store.into_set_cookie(cookies) {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriceRangeQuery {
    pub(crate) neighborhood_id: String,
    #[serde(rename = "type")]
    pub(crate) apartment_type: ApartmentType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailLoginRequest {
    pub(crate) email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SmsLoginRequest {
    pub(crate) phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifySmsRequest {
    pub(crate) phone_number: String,
    pub(crate) code: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedbackRequest {
    pub(crate) feedback: String,
}

async fn neighborhoods_endpoint<B, P>(State(state): State<PortalState<B, P>>) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    match state.portal.list_neighborhoods().await {
        Ok(neighborhoods) => Json(neighborhoods).into_response(),
        Err(err) => action_error_response(err),
    }
}

async fn price_range_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    Query(query): Query<PriceRangeQuery>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    match state
        .portal
        .price_range(&query.neighborhood_id, query.apartment_type)
        .await
    {
        Ok(range) => Json(json!({
            "min_from": range.min,
            "max_to": range.max,
            "available": range.available,
        }))
        .into_response(),
        Err(err) => action_error_response(err),
    }
}

async fn submit_preferences_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    Json(submission): Json<PreferencesSubmission>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    match state.portal.submit_preferences(submission).await {
        Ok(client_id) => Json(json!({ "clientId": client_id })).into_response(),
        Err(err) => action_error_response(err),
    }
}

async fn login_email_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
    Json(request): Json<EmailLoginRequest>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let addr = client_addr(&headers);
    match state
        .portal
        .send_login_code_email(&request.email, &addr)
        .await
    {
        Ok(()) => Json(json!({ "sent": true })).into_response(),
        Err(err) => action_error_response(err),
    }
}

async fn login_sms_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
    Json(request): Json<SmsLoginRequest>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let addr = client_addr(&headers);
    match state
        .portal
        .send_login_code_sms(&request.phone_number, &addr)
        .await
    {
        Ok(()) => Json(json!({ "sent": true })).into_response(),
        Err(err) => action_error_response(err),
    }
}

/// Successful verification installs the session cookie and redirects into
/// the portal.
async fn verify_sms_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
    Json(request): Json<VerifySmsRequest>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let addr = client_addr(&headers);
    match state
        .portal
        .verify_sms_code(&request.phone_number, &request.code, &addr)
        .await
    {
        Ok(session) => {
            let cookie =
                set_cookie_header(&session, &state.cookies.key, state.cookies.secure);
            let mut response =
                (StatusCode::FOUND, [(header::LOCATION, "/portal")]).into_response();
            if let Ok(value) = cookie.parse() {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            response
        }
        Err(err) => action_error_response(err),
    }
}

async fn logout_endpoint() -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response();
    if let Ok(value) = clear_cookie_header().parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn list_options_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let store = RequestSessionStore::from_headers(&headers, &state.cookies.key);
    let response = match state.portal.list_options(&store).await {
        Ok(options) => Json(options).into_response(),
        Err(err) => action_error_response(err),
    };
    with_session_cookie(response, store, &state.cookies)
}

async fn list_preferences_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let store = RequestSessionStore::from_headers(&headers, &state.cookies.key);
    let response = match state.portal.list_preferences(&store).await {
        Ok(preferences) => Json(preferences).into_response(),
        Err(err) => action_error_response(err),
    };
    with_session_cookie(response, store, &state.cookies)
}

async fn toggle_favorite_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
    Path(option_id): Path<String>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let store = RequestSessionStore::from_headers(&headers, &state.cookies.key);
    let response = match state.portal.toggle_favorite(&store, &option_id).await {
        Ok(favorited) => Json(json!({ "favorited": favorited })).into_response(),
        Err(err) => action_error_response(err),
    };
    with_session_cookie(response, store, &state.cookies)
}

async fn submit_feedback_endpoint<B, P>(
    State(state): State<PortalState<B, P>>,
    headers: HeaderMap,
    Path(option_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Response
where
    B: BackendApi + 'static,
    P: IdentityProvider + TokenRefresher + 'static,
{
    let store = RequestSessionStore::from_headers(&headers, &state.cookies.key);
    let response = match state
        .portal
        .submit_feedback(&store, &option_id, &request.feedback)
        .await
    {
        Ok(()) => Json(json!({ "saved": true })).into_response(),
        Err(err) => action_error_response(err),
    };
    with_session_cookie(response, store, &state.cookies)
}
