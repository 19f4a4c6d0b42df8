//! Placement controller library for edge accelerator clusters
//!
//! This crate provides the core functionality for:
//! - Per-node utilization telemetry from Prometheus
//! - Placement policy (classification, destination choice, initial spread)
//! - Ordered, idempotent migration through the orchestrator
//! - The KEDA external scaler admission service
//! - Health checks and observability

pub mod health;
pub mod migration;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod proto;
pub mod scaler;
pub mod settings;
pub mod telemetry;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use settings::Settings;
