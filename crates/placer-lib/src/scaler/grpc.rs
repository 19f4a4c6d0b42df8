//! External scaler gRPC handlers

use super::ScalerService;
use crate::observability::ControllerMetrics;
use crate::proto::{
    ExternalScaler, GetMetricSpecResponse, GetMetricsRequest, GetMetricsResponse,
    IsActiveResponse, MetricSpec, MetricValue, ScaledObjectRef,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::debug;

/// gRPC adapter over [`ScalerService`]
#[derive(Clone)]
pub struct ScalerGrpc {
    service: Arc<ScalerService>,
    metrics: Option<ControllerMetrics>,
}

impl ScalerGrpc {
    pub fn new(service: Arc<ScalerService>) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn count(&self, method: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_scaler_request(method);
        }
    }
}

#[tonic::async_trait]
impl ExternalScaler for ScalerGrpc {
    async fn is_active(
        &self,
        request: Request<ScaledObjectRef>,
    ) -> Result<Response<IsActiveResponse>, Status> {
        self.count("is_active");
        let result = self.service.is_active().await;
        debug!(scaled_object = %request.get_ref().name, active = result, "IsActive");
        Ok(Response::new(IsActiveResponse { result }))
    }

    async fn get_metric_spec(
        &self,
        _request: Request<ScaledObjectRef>,
    ) -> Result<Response<GetMetricSpecResponse>, Status> {
        self.count("get_metric_spec");
        let target = self.service.target_size();
        Ok(Response::new(GetMetricSpecResponse {
            metric_specs: vec![MetricSpec {
                metric_name: self.service.metric_name().to_string(),
                target_size: target,
                target_size_float: target as f64,
            }],
        }))
    }

    async fn get_metrics(
        &self,
        request: Request<GetMetricsRequest>,
    ) -> Result<Response<GetMetricsResponse>, Status> {
        self.count("get_metrics");
        let value = self.service.metric_value().await;
        debug!(requested = %request.get_ref().metric_name, value = value, "GetMetrics");
        Ok(Response::new(GetMetricsResponse {
            metric_values: vec![MetricValue {
                metric_name: self.service.metric_name().to_string(),
                metric_value: value.round() as i64,
                metric_value_float: value,
            }],
        }))
    }
}
