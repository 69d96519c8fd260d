//! HTTP client for one coordinator's budget service.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pbs_core::{ConsumePrivacyBudgetRequest, ConsumePrivacyBudgetResponse, CoordinatorEndpoint};
use tracing::{debug, info};

use crate::auth::{AuthEndpointTokenSource, StaticTokenSource, TokenSource};
use crate::coordinator::PrivacyBudgetClient;
use crate::error::{BudgetServiceError, StatusCode};
use crate::retry::RetryConfig;

/// Path of the consume endpoint, relative to the coordinator base URL.
pub const CONSUME_PATH: &str = "/privacybudget/consume";
/// Header naming the reporting origin the caller claims to act for.
pub const CLAIMED_IDENTITY_HEADER: &str = "x-gscp-claimed-identity";

/// Talks to one coordinator over HTTP. The transport handle and token source
/// are reused across calls.
pub struct HttpPrivacyBudgetClient {
    name: String,
    consume_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    retry: RetryConfig,
}

impl HttpPrivacyBudgetClient {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            consume_url: format!("{}{}", base_url.trim_end_matches('/'), CONSUME_PATH),
            http,
            tokens,
            retry,
        }
    }

    /// Build a client for a configured endpoint.
    ///
    /// The endpoint must name either an auth endpoint or a static token.
    pub fn from_endpoint(
        endpoint: &CoordinatorEndpoint,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> pbs_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| pbs_core::Error::Config(format!("HTTP client: {}", e)))?;

        let tokens: Arc<dyn TokenSource> = match (&endpoint.auth_endpoint, &endpoint.token) {
            (Some(auth), _) => Arc::new(AuthEndpointTokenSource::new(http.clone(), auth.clone())),
            (None, Some(token)) => Arc::new(StaticTokenSource::new(token.clone())),
            (None, None) => {
                return Err(pbs_core::Error::Config(format!(
                    "coordinator {} needs an auth_endpoint or a token",
                    endpoint.name
                )))
            }
        };

        Ok(Self::new(
            endpoint.name.clone(),
            &endpoint.base_url,
            http,
            tokens,
            retry,
        ))
    }

    pub fn consume_url(&self) -> &str {
        &self.consume_url
    }

    async fn attempt(
        &self,
        request: &ConsumePrivacyBudgetRequest,
        attempt: u32,
    ) -> Result<ConsumePrivacyBudgetResponse, BudgetServiceError> {
        let token = self.tokens.token().await?;

        debug!(coordinator = %self.name, attempt, url = %self.consume_url, "POST consume");
        let response = self
            .http
            .post(&self.consume_url)
            .bearer_auth(token)
            .header(CLAIMED_IDENTITY_HEADER, request.attribution_report_to())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                BudgetServiceError::new(StatusCode::Unavailable, format!("request failed: {}", e))
            })?;

        let status = response.status();
        let code = StatusCode::from_http(status.as_u16());
        if code != StatusCode::Success {
            if code == StatusCode::Unauthenticated {
                self.tokens.invalidate();
            }
            let body = response.text().await.unwrap_or_default();
            return Err(BudgetServiceError::new(
                code,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        let body = response.bytes().await.map_err(|e| {
            BudgetServiceError::new(StatusCode::Unavailable, format!("body read failed: {}", e))
        })?;
        let parsed: ConsumePrivacyBudgetResponse = serde_json::from_slice(&body).map_err(|e| {
            BudgetServiceError::new(
                StatusCode::Internal,
                format!("unexpected response body: {}", e),
            )
        })?;
        check_subset_of_request(request, &parsed)?;
        Ok(parsed)
    }
}

/// A coordinator may only report units that were in the request.
fn check_subset_of_request(
    request: &ConsumePrivacyBudgetRequest,
    response: &ConsumePrivacyBudgetResponse,
) -> Result<(), BudgetServiceError> {
    let requested: HashSet<_> = request.units().iter().collect();
    let foreign: Vec<String> = response
        .exhausted_privacy_budget_units
        .iter()
        .filter(|u| !requested.contains(u))
        .map(|u| u.to_string())
        .collect();
    if foreign.is_empty() {
        Ok(())
    } else {
        Err(BudgetServiceError::new(
            StatusCode::Internal,
            format!("response names units not in the request: [{}]", foreign.join(", ")),
        ))
    }
}

#[async_trait]
impl PrivacyBudgetClient for HttpPrivacyBudgetClient {
    fn coordinator(&self) -> &str {
        &self.name
    }

    async fn consume(
        &self,
        request: &ConsumePrivacyBudgetRequest,
    ) -> Result<ConsumePrivacyBudgetResponse, BudgetServiceError> {
        let response = self
            .retry
            .run(&self.name, |attempt| self.attempt(request, attempt))
            .await?;
        info!(
            coordinator = %self.name,
            units = request.units().len(),
            exhausted = response.exhausted_privacy_budget_units.len(),
            "coordinator consume complete"
        );
        Ok(response)
    }
}
