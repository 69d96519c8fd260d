//! Fan-out of a consume request across every configured coordinator.
//!
//! Aggregation is a union: a unit is exhausted if any coordinator says so.
//! If any coordinator fails, the whole call fails, even when others charged
//! successfully. All calls are driven to completion before the outcome is
//! decided, so no coordinator response is left unread.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use pbs_core::{BudgetConfig, ConsumePrivacyBudgetRequest, ConsumePrivacyBudgetResponse};
use tracing::{info, warn};

use crate::coordinator::PrivacyBudgetClient;
use crate::error::{CoordinatorFailure, DistributedBudgetError};
use crate::http::HttpPrivacyBudgetClient;
use crate::retry::RetryConfig;

/// Consumes budget at a fixed, ordered set of coordinators.
pub struct DistributedPrivacyBudgetClient {
    coordinators: Vec<Arc<dyn PrivacyBudgetClient>>,
}

impl DistributedPrivacyBudgetClient {
    pub fn new(coordinators: Vec<Arc<dyn PrivacyBudgetClient>>) -> pbs_core::Result<Self> {
        if coordinators.is_empty() {
            return Err(pbs_core::Error::Config(
                "distributed client needs at least one coordinator".into(),
            ));
        }
        Ok(Self { coordinators })
    }

    /// One HTTP client per configured coordinator, in configuration order.
    pub fn from_config(config: &BudgetConfig) -> pbs_core::Result<Self> {
        let retry = RetryConfig::new(config.retry_attempts, config.retry_delay());
        let coordinators = config
            .require_coordinators()?
            .iter()
            .map(|endpoint| {
                HttpPrivacyBudgetClient::from_endpoint(endpoint, retry, config.request_timeout())
                    .map(|c| Arc::new(c) as Arc<dyn PrivacyBudgetClient>)
            })
            .collect::<pbs_core::Result<Vec<_>>>()?;
        Self::new(coordinators)
    }

    pub fn coordinator_names(&self) -> Vec<&str> {
        self.coordinators.iter().map(|c| c.coordinator()).collect()
    }

    /// Charge the request at every coordinator and union the exhausted sets.
    ///
    /// The result lists exhausted units in request order; an empty list means
    /// every coordinator charged every unit.
    pub async fn consume_privacy_budget(
        &self,
        request: &ConsumePrivacyBudgetRequest,
    ) -> Result<ConsumePrivacyBudgetResponse, DistributedBudgetError> {
        request
            .validate()
            .map_err(|e| DistributedBudgetError::InvalidRequest(e.to_string()))?;

        let results = join_all(self.coordinators.iter().map(|c| c.consume(request))).await;

        let mut failures = Vec::new();
        let mut succeeded = Vec::new();
        let mut exhausted = HashSet::new();
        for (client, result) in self.coordinators.iter().zip(results) {
            match result {
                Ok(response) => {
                    succeeded.push(client.coordinator().to_string());
                    exhausted.extend(response.exhausted_privacy_budget_units);
                }
                Err(error) => {
                    warn!(
                        coordinator = client.coordinator(),
                        code = %error.code,
                        error = %error.message,
                        "coordinator consume failed"
                    );
                    failures.push(CoordinatorFailure {
                        coordinator: client.coordinator().to_string(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(DistributedBudgetError::CoordinatorFailure {
                failures,
                succeeded,
            });
        }

        let union: Vec<_> = request
            .units()
            .iter()
            .filter(|u| exhausted.contains(*u))
            .cloned()
            .collect();
        info!(
            origin = request.attribution_report_to(),
            coordinators = self.coordinators.len(),
            units = request.units().len(),
            exhausted = union.len(),
            "distributed consume complete"
        );
        Ok(ConsumePrivacyBudgetResponse::exhausted(union))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BudgetServiceError, ErrorKind, StatusCode};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pbs_core::PrivacyBudgetUnit;

    enum Script {
        Exhaust(Vec<PrivacyBudgetUnit>),
        Fail(StatusCode),
    }

    struct ScriptedCoordinator {
        name: &'static str,
        script: Script,
    }

    #[async_trait]
    impl PrivacyBudgetClient for ScriptedCoordinator {
        fn coordinator(&self) -> &str {
            self.name
        }

        async fn consume(
            &self,
            _request: &ConsumePrivacyBudgetRequest,
        ) -> Result<ConsumePrivacyBudgetResponse, BudgetServiceError> {
            match &self.script {
                Script::Exhaust(units) => Ok(ConsumePrivacyBudgetResponse::exhausted(units.clone())),
                Script::Fail(code) => Err(BudgetServiceError::new(*code, "scripted")),
            }
        }
    }

    fn coordinator(name: &'static str, script: Script) -> Arc<dyn PrivacyBudgetClient> {
        Arc::new(ScriptedCoordinator { name, script })
    }

    fn unit(key: &str) -> PrivacyBudgetUnit {
        PrivacyBudgetUnit::new(key, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap())
    }

    fn request(keys: &[&str]) -> ConsumePrivacyBudgetRequest {
        ConsumePrivacyBudgetRequest::new("abc.com", keys.iter().map(|k| unit(k)).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_union_of_exhausted_sets() {
        let client = DistributedPrivacyBudgetClient::new(vec![
            coordinator("coordinator-a", Script::Exhaust(vec![unit("x")])),
            coordinator("coordinator-b", Script::Exhaust(vec![])),
        ])
        .unwrap();

        let response = client.consume_privacy_budget(&request(&["x", "y"])).await.unwrap();
        assert_eq!(response.exhausted_privacy_budget_units, vec![unit("x")]);
    }

    #[tokio::test]
    async fn test_union_preserves_request_order() {
        let client = DistributedPrivacyBudgetClient::new(vec![
            coordinator("coordinator-a", Script::Exhaust(vec![unit("z")])),
            coordinator("coordinator-b", Script::Exhaust(vec![unit("x"), unit("z")])),
        ])
        .unwrap();

        let response = client
            .consume_privacy_budget(&request(&["x", "y", "z"]))
            .await
            .unwrap();
        assert_eq!(response.exhausted_privacy_budget_units, vec![unit("x"), unit("z")]);
    }

    #[tokio::test]
    async fn test_partial_failure_fails_whole_call() {
        let client = DistributedPrivacyBudgetClient::new(vec![
            coordinator("coordinator-a", Script::Exhaust(vec![])),
            coordinator("coordinator-b", Script::Fail(StatusCode::Unavailable)),
        ])
        .unwrap();

        let err = client.consume_privacy_budget(&request(&["x"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCoordinatorFailure);
        assert_eq!(err.failures()[0].coordinator, "coordinator-b");
        assert_eq!(err.status_code(), Some(StatusCode::Unavailable));
    }

    #[tokio::test]
    async fn test_every_failure_reported() {
        let client = DistributedPrivacyBudgetClient::new(vec![
            coordinator("coordinator-a", Script::Fail(StatusCode::Unauthenticated)),
            coordinator("coordinator-b", Script::Fail(StatusCode::Internal)),
        ])
        .unwrap();

        let err = client.consume_privacy_budget(&request(&["x"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert_eq!(err.failures().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_never_fans_out() {
        let client = DistributedPrivacyBudgetClient::new(vec![coordinator(
            "coordinator-a",
            Script::Fail(StatusCode::Internal),
        )])
        .unwrap();

        let bad: ConsumePrivacyBudgetRequest = serde_json::from_value(serde_json::json!({
            "attributionReportTo": "abc.com",
            "privacyBudgetUnits": [],
        }))
        .unwrap();
        let err = client.consume_privacy_budget(&bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_empty_coordinator_set_rejected() {
        assert!(DistributedPrivacyBudgetClient::new(vec![]).is_err());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = BudgetConfig {
            coordinators: vec![pbs_core::CoordinatorEndpoint {
                name: "coordinator-a".into(),
                base_url: "http://localhost:1".into(),
                auth_endpoint: None,
                token: None,
            }],
            ..Default::default()
        };
        assert!(DistributedPrivacyBudgetClient::from_config(&config).is_err());
    }
}
