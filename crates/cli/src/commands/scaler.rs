//! Probe a running daemon over the external scaler protocol

use anyhow::{Context, Result};
use placer_lib::proto::{ExternalScalerClient, GetMetricsRequest, ScaledObjectRef};
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;
use tonic::transport::Endpoint;

use crate::output::{color_status, print_json, print_table, OutputFormat};

#[derive(Debug, Serialize)]
struct ProbeResult {
    active: bool,
    metric_name: String,
    target_size: i64,
    metric_value: i64,
    metric_value_float: f64,
}

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "RPC")]
    rpc: &'static str,
    #[tabled(rename = "Result")]
    result: String,
}

/// Call IsActive, GetMetricSpec and GetMetrics and print the answers
pub async fn probe(
    endpoint: &str,
    scaled_object: &str,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let channel = Endpoint::from_shared(endpoint.to_string())
        .context("Invalid scaler endpoint")?
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", endpoint))?;
    let mut client = ExternalScalerClient::new(channel);

    let object = ScaledObjectRef {
        name: scaled_object.to_string(),
        namespace: namespace.to_string(),
        ..Default::default()
    };

    let active = client
        .is_active(object.clone())
        .await
        .context("IsActive failed")?
        .into_inner()
        .result;

    let spec = client
        .get_metric_spec(object.clone())
        .await
        .context("GetMetricSpec failed")?
        .into_inner();
    let metric_spec = spec
        .metric_specs
        .into_iter()
        .next()
        .context("GetMetricSpec returned no metric")?;

    let metrics = client
        .get_metrics(GetMetricsRequest {
            scaled_object_ref: Some(object),
            metric_name: metric_spec.metric_name.clone(),
        })
        .await
        .context("GetMetrics failed")?
        .into_inner();
    let value = metrics
        .metric_values
        .into_iter()
        .next()
        .context("GetMetrics returned no value")?;

    let result = ProbeResult {
        active,
        metric_name: metric_spec.metric_name,
        target_size: metric_spec.target_size,
        metric_value: value.metric_value,
        metric_value_float: value.metric_value_float,
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let rows = [
                ProbeRow {
                    rpc: "IsActive",
                    result: color_status(if result.active { "active" } else { "inactive" }),
                },
                ProbeRow {
                    rpc: "GetMetricSpec",
                    result: format!("{} (target {})", result.metric_name, result.target_size),
                },
                ProbeRow {
                    rpc: "GetMetrics",
                    result: format!("{} ({:.2})", result.metric_value, result.metric_value_float),
                },
            ];
            print_table(&rows, "No response");
        }
    }
    Ok(())
}
