//! Bearer token sources attached to every coordinator call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{BudgetServiceError, StatusCode};

/// Tokens are refreshed this long before they expire.
const REFRESH_SKEW: Duration = Duration::from_secs(60);
/// Lifetime assumed when the auth endpoint does not state one.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Supplies the bearer token for a coordinator.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, BudgetServiceError>;

    /// Drop any cached token so the next call fetches a fresh one. Called
    /// when a coordinator rejects the current token.
    fn invalidate(&self) {}
}

/// A fixed, pre-provisioned token.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, BudgetServiceError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_in_secs: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Mints tokens from a coordinator's auth endpoint and caches them until
/// shortly before expiry.
pub struct AuthEndpointTokenSource {
    http: reqwest::Client,
    endpoint: String,
    cached: Mutex<Option<CachedToken>>,
}

impl AuthEndpointTokenSource {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.cached
            .lock()
            .as_ref()
            .filter(|c| Instant::now() < c.refresh_at)
            .map(|c| c.value.clone())
    }

    /// An unreachable or 5xx auth endpoint is `Unavailable` and retried like
    /// the coordinator itself; any other refusal is `Unauthenticated`.
    async fn mint(&self) -> Result<TokenResponse, BudgetServiceError> {
        let response = self.http.post(&self.endpoint).send().await.map_err(|e| {
            BudgetServiceError::new(
                StatusCode::Unavailable,
                format!("auth endpoint {} unreachable: {}", self.endpoint, e),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let code = if status.is_server_error() {
                StatusCode::Unavailable
            } else {
                StatusCode::Unauthenticated
            };
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = %self.endpoint, status = status.as_u16(), "token request failed");
            return Err(BudgetServiceError::new(
                code,
                format!("auth endpoint returned {}: {}", status, body),
            ));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            BudgetServiceError::new(
                StatusCode::Unauthenticated,
                format!("malformed token response: {}", e),
            )
        })
    }
}

#[async_trait]
impl TokenSource for AuthEndpointTokenSource {
    async fn token(&self) -> Result<String, BudgetServiceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let minted = self.mint().await?;
        let lifetime = minted
            .expires_in_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let refresh_at = Instant::now() + lifetime.saturating_sub(REFRESH_SKEW);
        debug!(endpoint = %self.endpoint, lifetime_secs = lifetime.as_secs(), "minted token");

        *self.cached.lock() = Some(CachedToken {
            value: minted.token.clone(),
            refresh_at,
        });
        Ok(minted.token)
    }

    fn invalidate(&self) {
        if self.cached.lock().take().is_some() {
            debug!(endpoint = %self.endpoint, "dropped rejected token");
        }
    }
}
