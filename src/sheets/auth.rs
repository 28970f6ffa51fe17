//! Service-account OAuth: a signed JWT is exchanged for a bearer token,
//! which is cached until shortly before it expires.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{GOOGLE_SCOPES, TOKEN_REFRESH_MARGIN_SECS};
use crate::error::{classify_http, AppError, Result};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The fields of a Google service-account key file that the grant needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read credentials {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|e| AppError::Config(format!("credentials {}: {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("not a service-account key: {e}")))?;
        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(AppError::Config(
                "service-account key lacks client_email or private_key".to_string(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    /// Unix seconds after which the token is no longer handed out.
    refresh_at: i64,
}

pub struct TokenProvider {
    http: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, key: ServiceAccountKey) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid service-account private key: {e}")))?;
        Ok(Self {
            http,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// A valid bearer token, fetching a new one when the cached one is close
    /// to expiry. Concurrent callers share one refresh.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref() {
            if now < token.refresh_at {
                return Ok(token.value.clone());
            }
            debug!("Access token for {} is due for refresh", self.key.client_email);
        }

        let assertion = self.sign_assertion(now)?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .timeout(Duration::from_secs(30))
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http(status, "OAuth token exchange", &body));
        }
        let token: TokenResponse = resp.json().await?;
        info!(
            "Obtained Google access token for {} (expires in {}s)",
            self.key.client_email, token.expires_in
        );

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            refresh_at: refresh_deadline(now, token.expires_in),
        });
        Ok(value)
    }

    fn sign_assertion(&self, now: i64) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: GOOGLE_SCOPES,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| AppError::Config(format!("cannot sign OAuth assertion: {e}")))
    }
}

fn refresh_deadline(now: i64, expires_in: i64) -> i64 {
    now + (expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0)
}
