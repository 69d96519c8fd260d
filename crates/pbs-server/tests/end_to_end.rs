//! Two coordinators on real sockets, cleared through the distributed client.

use std::sync::Arc;

use chrono::{DurationRound, TimeDelta, Utc};
use pbs_client::{BudgetGate, Clearance, DistributedPrivacyBudgetClient, ErrorKind};
use pbs_core::{BudgetConfig, ConsumePrivacyBudgetRequest, CoordinatorEndpoint, PrivacyBudgetUnit};
use pbs_ledger::InMemoryLedger;
use pbs_server::{build_router, AppState};

/// Start a coordinator that accepts `token` for `abc.com`. Returns its base URL.
async fn spawn_coordinator(token: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = BudgetConfig::default();
    config
        .allowed_identities
        .insert(token.into(), vec!["abc.com".into()]);
    let app = build_router(Arc::new(AppState::new(
        config,
        Arc::new(InMemoryLedger::new()),
    )));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/v1", addr)
}

fn client_config(endpoints: Vec<(&str, String, &str)>) -> BudgetConfig {
    BudgetConfig {
        coordinators: endpoints
            .into_iter()
            .map(|(name, base_url, token)| CoordinatorEndpoint {
                name: name.into(),
                base_url,
                auth_endpoint: None,
                token: Some(token.into()),
            })
            .collect(),
        retry_attempts: 2,
        retry_delay_ms: 10,
        ..Default::default()
    }
}

fn recent_units() -> Vec<PrivacyBudgetUnit> {
    let window = (Utc::now() - TimeDelta::hours(2))
        .duration_trunc(TimeDelta::hours(1))
        .unwrap();
    vec![
        PrivacyBudgetUnit::new("k1", window),
        PrivacyBudgetUnit::new("k2", window),
    ]
}

#[tokio::test]
async fn test_two_coordinators_charge_once() {
    let a = spawn_coordinator("tok-a").await;
    let b = spawn_coordinator("tok-b").await;
    let config = client_config(vec![("coordinator-a", a, "tok-a"), ("coordinator-b", b, "tok-b")]);
    let client = DistributedPrivacyBudgetClient::from_config(&config).unwrap();
    let units = recent_units();
    let request = ConsumePrivacyBudgetRequest::new("abc.com", units.clone()).unwrap();

    let first = client.consume_privacy_budget(&request).await.unwrap();
    assert!(first.is_fully_cleared());

    let second = client.consume_privacy_budget(&request).await.unwrap();
    assert_eq!(second.exhausted_privacy_budget_units, units);
}

#[tokio::test]
async fn test_wrong_token_at_one_coordinator_fails_call() {
    let a = spawn_coordinator("tok-a").await;
    let b = spawn_coordinator("tok-b").await;
    let config = client_config(vec![("coordinator-a", a, "tok-a"), ("coordinator-b", b, "stale")]);
    let gate = BudgetGate::new(DistributedPrivacyBudgetClient::from_config(&config).unwrap(), 30);

    let err = gate.clear("abc.com", recent_units()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialCoordinatorFailure);
    assert_eq!(err.failures()[0].coordinator, "coordinator-b");
}

#[tokio::test]
async fn test_gate_clears_then_reports_exhausted() {
    let a = spawn_coordinator("tok-a").await;
    let b = spawn_coordinator("tok-b").await;
    let config = client_config(vec![("coordinator-a", a, "tok-a"), ("coordinator-b", b, "tok-b")]);
    let gate = BudgetGate::new(DistributedPrivacyBudgetClient::from_config(&config).unwrap(), 30);

    let units = recent_units();
    assert_eq!(gate.clear("abc.com", units.clone()).await.unwrap(), Clearance::Cleared);
    assert_eq!(
        gate.clear("abc.com", units.clone()).await.unwrap(),
        Clearance::Exhausted(units)
    );
}
