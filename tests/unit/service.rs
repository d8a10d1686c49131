use std::time::Duration;

use anyhow::Result;
use chagall::{telemetry, Filter, Gateway, GatewayConfig, GatewayError, Operation};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::MockBackend;

fn test_config() -> GatewayConfig {
    GatewayConfig {
        rate_limit_delay: Duration::from_millis(10),
        saturation_poll: Duration::from_millis(5),
        idle_sleep: Duration::from_millis(10),
        batch_timeout: Duration::from_millis(50),
        operation_timeout: None,
        ..GatewayConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn crud_flows_through_the_priority_queue() -> Result<()> {
    telemetry::init();
    let backend = MockBackend::new();
    let gateway = Gateway::new(test_config(), Some(backend.clone()));
    gateway.start();

    let inserted = gateway.insert("habits", json!({"name": "run"})).await?;
    assert_eq!(inserted, json!({"name": "run"}));

    let row = gateway
        .fetch_one("habits", vec![Filter::eq("id", "h1")])
        .await?;
    assert_eq!(row, json!({"id": "h1"}));

    gateway
        .update("habits", json!({"streak": 2}), vec![Filter::eq("id", "h1")])
        .await?;
    gateway.delete("habits", vec![Filter::eq("id", "h1")]).await?;
    gateway.stop().await;

    let ops: Vec<_> = backend.executed().iter().map(|p| p.op).collect();
    assert_eq!(
        ops,
        vec![
            Operation::Insert,
            Operation::Select,
            Operation::Update,
            Operation::Delete,
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_to_success() -> Result<()> {
    let backend = MockBackend::failing_first(2);
    let gateway = Gateway::new(test_config(), Some(backend.clone()));
    gateway.start();

    let rows = gateway
        .fetch_all("budgets", vec![Filter::eq("month", "2024-06")])
        .await?;
    gateway.stop().await;

    assert_eq!(rows, json!([{"month": "2024-06"}]));
    let metrics = gateway.dispatcher_metrics();
    assert_eq!(metrics.retried.load(std::sync::atomic::Ordering::Relaxed), 2);
    assert_eq!(backend.executed().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn auth_against_the_stub_yields_synthetic_identities() -> Result<()> {
    let gateway = Gateway::new(test_config(), None);
    gateway.start();

    let session = gateway.sign_in("a@b.c", "hunter2").await?;
    assert_eq!(session.user.role.as_deref(), Some("authenticated"));

    let user = gateway.current_user().await?;
    assert_eq!(user, session.user);

    gateway.sign_out().await?;
    gateway.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rpc_and_functions_pass_through() -> Result<()> {
    let gateway = Gateway::new(test_config(), None);
    gateway.start();

    // Stub client: both resolve to null instead of failing.
    assert_eq!(gateway.rpc("health_score", json!({})).await?, json!(null));
    assert_eq!(
        gateway.invoke_function("insights", json!({"week": 24})).await?,
        json!(null)
    );
    gateway.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stopped_gateway_rejects_new_work() {
    let gateway = Gateway::new(test_config(), None);
    gateway.start();
    gateway.stop().await;

    let queued = gateway.fetch_one("habits", vec![]).await;
    assert_eq!(queued.unwrap_err(), GatewayError::Shutdown);

    let batched = gateway.batch_select("habits", vec![]).await;
    assert_eq!(batched.unwrap_err(), GatewayError::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn health_probe_reports_through_the_facade() -> Result<()> {
    let backend = MockBackend::new();
    let config = GatewayConfig {
        health_check_interval: Duration::from_secs(1),
        ..test_config()
    };
    let gateway = Gateway::new(config, Some(backend));
    gateway.start();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let status = gateway.health();
    gateway.stop().await;

    assert!(status.healthy);
    assert!(status.last_check.is_some());
    Ok(())
}
