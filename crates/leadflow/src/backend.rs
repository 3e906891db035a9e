//! Seam for the external REST backend that owns clients, options, and
//! apartment inventory. Handlers and the wizard depend on the trait; the
//! HTTP implementation lives alongside so tests can substitute scripted
//! doubles.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::wizard::form::{ApartmentType, SubmissionPayload, TourType};
use crate::wizard::price::{PriceRange, PriceRangeLookup};
use crate::wizard::SubmissionSink;

/// Failures from the backend, classified so callers can route them: `Unauthorized`
/// feeds the refresh-and-retry executor, the conflict pair feeds duplicate-registration
/// messaging, everything else surfaces as request-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("email already exists")]
    EmailExists,
    #[error("phone number already exists")]
    PhoneExists,
    #[error("{0}")]
    Validation(String),
    #[error("resource not found")]
    NotFound,
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("backend returned status {status}")]
    Status { status: u16 },
}

/// Referral-eligible neighborhood offered on the first wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighborhood {
    pub id: String,
    pub name: String,
}

/// An apartment option curated for the logged-in client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOption {
    pub id: String,
    #[serde(default)]
    pub favorited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// A past preferences submission shown in the portal, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPreferences {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment_type: Option<ApartmentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_in_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour_type: Option<TourType>,
}

/// Operations the wizard and portal need from the external backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_neighborhoods(&self) -> Result<Vec<Neighborhood>, BackendError>;
    async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<PriceRange, BackendError>;
    async fn submit_client(&self, payload: &SubmissionPayload) -> Result<(), BackendError>;
    async fn get_option(
        &self,
        option_id: &str,
        access_token: &str,
    ) -> Result<ClientOption, BackendError>;
    async fn set_favorite(
        &self,
        option_id: &str,
        favorited: bool,
        access_token: &str,
    ) -> Result<(), BackendError>;
    async fn set_feedback(
        &self,
        option_id: &str,
        feedback: &str,
        access_token: &str,
    ) -> Result<(), BackendError>;
    async fn list_options(&self, access_token: &str) -> Result<Vec<ClientOption>, BackendError>;
    async fn list_preferences(
        &self,
        access_token: &str,
    ) -> Result<Vec<ClientPreferences>, BackendError>;
}

/// Reqwest-backed client for the backend's v1 API.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Wire shape of the price-range endpoint.
#[derive(Debug, Deserialize)]
struct PriceRangeBody {
    min_from: u32,
    max_to: u32,
    available: bool,
}

/// Error body the backend attaches to 4xx responses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn classify_failure(response: reqwest::Response) -> BackendError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let detail = body.error.or(body.message);

    match status.as_u16() {
        401 => BackendError::Unauthorized,
        404 => BackendError::NotFound,
        409 => match detail.as_deref() {
            Some("email already exists") => BackendError::EmailExists,
            Some("phone number already exists") => BackendError::PhoneExists,
            _ => BackendError::Status {
                status: status.as_u16(),
            },
        },
        400 => BackendError::Validation(detail.unwrap_or_else(|| {
            "Invalid request data. Please check all fields and try again.".to_string()
        })),
        other => BackendError::Status { status: other },
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_neighborhoods(&self) -> Result<Vec<Neighborhood>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/v1/neighborhoods"))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<PriceRange, BackendError> {
        let response = self
            .client
            .get(self.url("/api/v1/apartments/price-range"))
            .query(&[
                ("neighborhood_id", neighborhood_id),
                ("type", apartment_type.wire_name()),
            ])
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        let body: PriceRangeBody = response.json().await.map_err(transport)?;
        Ok(PriceRange {
            min: body.min_from,
            max: body.max_to,
            available: body.available,
        })
    }

    async fn submit_client(&self, payload: &SubmissionPayload) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/api/v1/clients/public"))
            .json(payload)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        Ok(())
    }

    async fn get_option(
        &self,
        option_id: &str,
        access_token: &str,
    ) -> Result<ClientOption, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/clients/me/options/{option_id}")))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn set_favorite(
        &self,
        option_id: &str,
        favorited: bool,
        access_token: &str,
    ) -> Result<(), BackendError> {
        let response = self
            .client
            .patch(self.url(&format!(
                "/api/v1/clients/me/options/{option_id}/favorite"
            )))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "favorited": favorited }))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        Ok(())
    }

    async fn set_feedback(
        &self,
        option_id: &str,
        feedback: &str,
        access_token: &str,
    ) -> Result<(), BackendError> {
        let response = self
            .client
            .patch(self.url(&format!(
                "/api/v1/clients/me/options/{option_id}/feedback"
            )))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "feedback": feedback }))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        Ok(())
    }

    async fn list_options(&self, access_token: &str) -> Result<Vec<ClientOption>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/v1/clients/me/options"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn list_preferences(
        &self,
        access_token: &str,
    ) -> Result<Vec<ClientPreferences>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/v1/clients/me/preferences"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        let mut preferences: Vec<ClientPreferences> = response.json().await.map_err(transport)?;
        preferences.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(preferences)
    }
}

#[async_trait]
impl PriceRangeLookup for HttpBackend {
    async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<PriceRange, BackendError> {
        BackendApi::price_range(self, neighborhood_id, apartment_type).await
    }
}

#[async_trait]
impl SubmissionSink for HttpBackend {
    async fn submit_client(&self, payload: &SubmissionPayload) -> Result<(), BackendError> {
        BackendApi::submit_client(self, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let backend = HttpBackend::new(reqwest::Client::new(), "http://backend.local/");
        assert_eq!(
            backend.url("/api/v1/neighborhoods"),
            "http://backend.local/api/v1/neighborhoods"
        );
    }
}
