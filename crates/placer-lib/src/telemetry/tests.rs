//! Tests for telemetry sampling

use super::*;
use crate::health::HealthRegistry;
use crate::models::{MetricScale, NodeTarget};
use mockito::Matcher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Backend answering from a fixed table; expressions not in the table fail
struct TableBackend {
    values: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl TableBackend {
    fn new(values: &[(&str, f64)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(expr, v)| (expr.to_string(), *v))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MetricsBackend for TableBackend {
    async fn query_instant(&self, expression: &str) -> anyhow::Result<Vec<Sample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.values.get(expression) {
            Some(value) => Ok(vec![Sample {
                labels: Default::default(),
                value: *value,
                timestamp: 0.0,
            }]),
            None => anyhow::bail!("connection refused"),
        }
    }

    async fn query_range(
        &self,
        expression: &str,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
        _step: Duration,
    ) -> anyhow::Result<Vec<Sample>> {
        let value = self
            .values
            .get(expression)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))?;
        Ok((0..3)
            .map(|i| Sample {
                labels: Default::default(),
                value: value + i as f64,
                timestamp: i as f64,
            })
            .collect())
    }
}

/// Backend that never answers in time
struct StalledBackend;

#[async_trait]
impl MetricsBackend for StalledBackend {
    async fn query_instant(&self, _expression: &str) -> anyhow::Result<Vec<Sample>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }

    async fn query_range(
        &self,
        _expression: &str,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
        _step: Duration,
    ) -> anyhow::Result<Vec<Sample>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }
}

fn nodes() -> Vec<NodeTarget> {
    vec![
        NodeTarget::new("agx", "jetson_gpu_usage_percent", "10.0.0.1:9100"),
        NodeTarget::new("orin", "jetson_gpu_usage_percent", "10.0.0.2:9100"),
        NodeTarget::new("nano", "jetson_gpu_usage_percent", "10.0.0.3:9100"),
    ]
}

fn expr(instance: &str) -> String {
    format!("jetson_gpu_usage_percent{{instance=\"{}\"}}", instance)
}

#[tokio::test]
async fn test_failed_node_is_absent_not_zero() {
    let backend = TableBackend::new(&[(&expr("10.0.0.1:9100"), 80.0), (&expr("10.0.0.3:9100"), 20.0)]);
    let client = TelemetryClient::new(Arc::new(backend), nodes(), Duration::from_secs(1));

    let snapshot = client.snapshot_instant().await;

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get("agx"), Some(80.0));
    assert_eq!(snapshot.get("nano"), Some(20.0));
    assert!(!snapshot.contains("orin"));
}

#[tokio::test]
async fn test_absent_for_whole_window() {
    let backend = Arc::new(TableBackend::new(&[(&expr("10.0.0.1:9100"), 40.0)]));
    let client = TelemetryClient::new(backend.clone(), nodes(), Duration::from_secs(1));
    let (_tx, mut rx) = broadcast::channel(1);

    let snapshot = client
        .sample_window(WindowSpec::new(3, Duration::from_millis(1)), &mut rx)
        .await
        .unwrap();

    assert_eq!(snapshot.get("agx"), Some(40.0));
    assert!(!snapshot.contains("orin"));
    assert!(!snapshot.contains("nano"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_window_interrupted_by_shutdown() {
    let backend = TableBackend::new(&[(&expr("10.0.0.1:9100"), 40.0)]);
    let client = TelemetryClient::new(Arc::new(backend), nodes(), Duration::from_secs(1));
    let (tx, mut rx) = broadcast::channel(1);
    tx.send(()).unwrap();

    let result = client
        .sample_window(WindowSpec::new(5, Duration::from_secs(60)), &mut rx)
        .await;
    assert!(result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_node_times_out() {
    let client = TelemetryClient::new(Arc::new(StalledBackend), nodes(), Duration::from_secs(2));
    let readings = client.sample_instant().await;
    assert!(readings.is_empty());
}

#[tokio::test]
async fn test_fraction_scaled_and_clamped() {
    let mut targets = nodes();
    targets[0].scale = MetricScale::Fraction;
    let backend = TableBackend::new(&[
        (&expr("10.0.0.1:9100"), 0.35),
        (&expr("10.0.0.2:9100"), 130.0),
    ]);
    let client = TelemetryClient::new(Arc::new(backend), targets, Duration::from_secs(1));

    let snapshot = client.snapshot_instant().await;
    assert!((snapshot.get("agx").unwrap() - 35.0).abs() < 1e-9);
    assert_eq!(snapshot.get("orin"), Some(100.0));
}

#[tokio::test]
async fn test_range_sampling_averages_series() {
    let backend = TableBackend::new(&[(&expr("10.0.0.2:9100"), 50.0)]);
    let client = TelemetryClient::new(Arc::new(backend), nodes(), Duration::from_secs(1));

    let snapshot = client
        .sample_range(Duration::from_secs(900), Duration::from_secs(60))
        .await;
    assert_eq!(snapshot.get("orin"), Some(51.0));
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn test_prometheus_instant_query() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            expr("10.0.0.1:9100"),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"instance":"10.0.0.1:9100"},"value":[1700000000.1,"63.5"]}]}}"#,
        )
        .create_async()
        .await;

    let backend = PrometheusBackend::new(&server.url(), Duration::from_secs(2)).unwrap();
    let samples = backend.query_instant(&expr("10.0.0.1:9100")).await.unwrap();

    mock.assert_async().await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 63.5);
}

#[tokio::test]
async fn test_prometheus_error_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#)
        .create_async()
        .await;

    let backend = PrometheusBackend::new(&server.url(), Duration::from_secs(2)).unwrap();
    let err = backend.query_instant("bad{").await.unwrap_err();
    assert!(err.to_string().contains("parse error"));
}

#[tokio::test]
async fn test_prometheus_range_query() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), expr("10.0.0.2:9100")),
            Matcher::UrlEncoded("step".into(), "60s".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"instance":"10.0.0.2:9100"},"values":[[1.0,"0.2"],[61.0,"0.4"]]}]}}"#,
        )
        .create_async()
        .await;

    let backend = PrometheusBackend::new(&server.url(), Duration::from_secs(2)).unwrap();
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::minutes(15);
    let samples = backend
        .query_range(&expr("10.0.0.2:9100"), start, end, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].value, 0.4);
}

#[tokio::test]
async fn test_sampling_loop_publishes_pass() {
    let backend = TableBackend::new(&[(&expr("10.0.0.1:9100"), 12.0)]);
    let client = TelemetryClient::new(Arc::new(backend), nodes(), Duration::from_secs(1));
    let store = SnapshotStore::new();
    let health = HealthRegistry::new();

    let sampling = SamplingLoop::builder(client, store.clone())
        .health(health.clone())
        .build();
    sampling.pass().await;

    let view = store.current().await;
    assert!(view.is_initialized());
    assert_eq!(view.snapshot.get("agx"), Some(12.0));
    assert!(health.readiness().await.ready);
}

#[tokio::test]
async fn test_sampling_loop_stops_on_shutdown() {
    let backend = TableBackend::new(&[]);
    let client = TelemetryClient::new(Arc::new(backend), nodes(), Duration::from_secs(1));
    let sampling = SamplingLoop::builder(client, SnapshotStore::new())
        .interval(Duration::from_millis(10))
        .build();

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(sampling.run(rx));
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
}
