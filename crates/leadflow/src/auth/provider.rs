use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use super::session::User;
use crate::config::IdentityConfig;

/// SMS dispatch gets a short deadline so an unhealthy gateway surfaces as a
/// distinguished "service unavailable" instead of a hung request.
pub const SMS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens returned by code verification or a refresh-token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<u64>,
}

/// Successful login: the asserted user plus the token set to seed a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLogin {
    pub user: User,
    pub tokens: TokenSet,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider request timed out")]
    Timeout,
    #[error("{0}")]
    Rejected(String),
    #[error("identity provider request failed: {0}")]
    Transport(String),
    #[error("identity provider returned an unusable token")]
    InvalidToken,
}

/// Passwordless login collaborator: sends one-time codes and verifies them.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn send_email_code(&self, email: &str) -> Result<(), ProviderError>;
    async fn send_sms_code(&self, phone_number: &str) -> Result<(), ProviderError>;
    async fn verify_sms_code(
        &self,
        phone_number: &str,
        code: &str,
    ) -> Result<VerifiedLogin, ProviderError>;
}

/// Exchanges a refresh token for a new token set. Split from
/// [`IdentityProvider`] because the authenticated executor needs only this.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;
}

/// HTTP client for the provider's passwordless and token endpoints.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: IdentityConfig,
}

impl HttpIdentityProvider {
    pub fn new(client: reqwest::Client, config: IdentityConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("https://{}/{path}", self.config.domain)
    }

    async fn start_passwordless(
        &self,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<(), ProviderError> {
        let mut request = self
            .client
            .post(self.endpoint("passwordless/start"))
            .json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(classify_transport)?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(rejection_from_response(response).await)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn send_email_code(&self, email: &str) -> Result<(), ProviderError> {
        self.start_passwordless(
            serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "connection": "email",
                "email": email,
                "send": "code",
            }),
            None,
        )
        .await
    }

    async fn send_sms_code(&self, phone_number: &str) -> Result<(), ProviderError> {
        self.start_passwordless(
            serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "connection": "sms",
                "phone_number": phone_number,
                "send": "code",
            }),
            Some(SMS_SEND_TIMEOUT),
        )
        .await
    }

    async fn verify_sms_code(
        &self,
        phone_number: &str,
        code: &str,
    ) -> Result<VerifiedLogin, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("oauth/token"))
            .form(&[
                (
                    "grant_type",
                    "http://auth0.com/oauth/grant-type/passwordless/otp",
                ),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("username", phone_number),
                ("otp", code),
                ("realm", "sms"),
                ("scope", "openid profile email phone"),
                ("audience", self.config.audience.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            return Err(rejection_from_response(response).await);
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            warn!("token response carried no id_token");
            ProviderError::InvalidToken
        })?;
        let claims = decode_id_token_claims(id_token)?;

        let user = User {
            id: claims.sub,
            email: claims.email.unwrap_or_default(),
            phone: Some(
                claims
                    .phone_number
                    .unwrap_or_else(|| phone_number.to_string()),
            ),
            name: claims.name,
            role: Some("client".to_string()),
        };

        Ok(VerifiedLogin {
            user,
            tokens: TokenSet {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token.ok_or(ProviderError::InvalidToken)?,
                expires_in: tokens.expires_in,
            },
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpIdentityProvider {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("oauth/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            return Err(rejection_from_response(response).await);
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        Ok(TokenSet {
            // Rotation may hand back the same refresh token or a new one.
            refresh_token: tokens.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            access_token: tokens.access_token,
            expires_in: tokens.expires_in,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Parse the id_token's claims segment. The token arrives directly from the
/// provider over TLS in the same exchange, so the signature is not
/// re-verified here.
fn decode_id_token_claims(id_token: &str) -> Result<IdTokenClaims, ProviderError> {
    let mut segments = id_token.split('.');
    let (_header, payload) = match (segments.next(), segments.next()) {
        (Some(h), Some(p)) if !p.is_empty() => (h, p),
        _ => return Err(ProviderError::InvalidToken),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| ProviderError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| ProviderError::InvalidToken)
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

async fn rejection_from_response(response: reqwest::Response) -> ProviderError {
    #[derive(Deserialize)]
    struct ProviderErrorBody {
        #[serde(default)]
        error_description: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    let status = response.status();
    let message = match response.json::<ProviderErrorBody>().await {
        Ok(body) => body
            .error_description
            .or(body.error)
            .unwrap_or_else(|| format!("provider returned status {status}")),
        Err(_) => format!("provider returned status {status}"),
    };
    ProviderError::Rejected(message)
}
