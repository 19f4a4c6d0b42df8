//! Prometheus HTTP API backend

use super::{async_trait, MetricsBackend, Sample};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Response envelope of `/api/v1/query` and `/api/v1/query_range`
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<InstantSeries>),
    Matrix(Vec<RangeSeries>),
    Scalar(RawPoint),
    String(RawPoint),
}

#[derive(Debug, Deserialize)]
struct InstantSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: RawPoint,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    values: Vec<RawPoint>,
}

/// `[<unix seconds>, "<value>"]`
#[derive(Debug, Deserialize)]
struct RawPoint(f64, String);

impl RawPoint {
    fn into_sample(self, labels: BTreeMap<String, String>) -> Option<Sample> {
        let value: f64 = self.1.parse().ok()?;
        // Prometheus encodes missing arithmetic as NaN
        if !value.is_finite() {
            return None;
        }
        Some(Sample {
            labels,
            value,
            timestamp: self.0,
        })
    }
}

/// Metrics backend talking to a Prometheus server
#[derive(Debug, Clone)]
pub struct PrometheusBackend {
    client: Client,
    base_url: Url,
}

impl PrometheusBackend {
    /// Create a backend for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Prometheus URL: {}", base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<ApiData> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .context("Failed to send query")?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse query response ({})", status))?;

        if body.status != "success" {
            anyhow::bail!(
                "Query failed ({}): {}",
                status,
                body.error.unwrap_or_else(|| body.status.clone())
            );
        }

        body.data
            .ok_or_else(|| anyhow::anyhow!("Query response has no data"))
    }
}

fn flatten(data: ApiData) -> Vec<Sample> {
    match data {
        ApiData::Vector(series) => series
            .into_iter()
            .filter_map(|s| s.value.into_sample(s.metric))
            .collect(),
        ApiData::Matrix(series) => series
            .into_iter()
            .flat_map(|s| {
                let labels = s.metric;
                s.values
                    .into_iter()
                    .filter_map(move |p| p.into_sample(labels.clone()))
            })
            .collect(),
        ApiData::Scalar(point) | ApiData::String(point) => {
            point.into_sample(BTreeMap::new()).into_iter().collect()
        }
    }
}

#[async_trait]
impl MetricsBackend for PrometheusBackend {
    async fn query_instant(&self, expression: &str) -> Result<Vec<Sample>> {
        let data = self
            .get("api/v1/query", &[("query", expression.to_string())])
            .await?;
        Ok(flatten(data))
    }

    async fn query_range(
        &self,
        expression: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Sample>> {
        let params = [
            ("query", expression.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", format!("{}s", step.as_secs().max(1))),
        ];
        let data = self.get("api/v1/query_range", &params).await?;
        Ok(flatten(data))
    }
}
