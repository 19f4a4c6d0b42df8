//! Edge Placer - placement controller for accelerator workloads
//!
//! Samples per-node utilization, answers the KEDA external scaler
//! protocol and migrates workload instances away from saturated nodes.

use anyhow::Result;
use placer_lib::{
    health::{components, HealthRegistry},
    migration::{LastStableStore, MigrationController, RebalanceSupervisor},
    observability::{ControllerMetrics, StructuredLogger},
    orchestrator::{KubeOrchestrator, Orchestrator},
    policy::PlacementPolicy,
    proto::ExternalScalerServer,
    scaler::{OverloadMonitor, ScalerGrpc, ScalerService},
    telemetry::{PrometheusBackend, SamplingLoop, SnapshotStore, TelemetryClient, WindowSpec},
    Settings,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting edge-placer");

    let settings = Settings::load()?;
    info!(
        nodes = settings.nodes.len(),
        groups = settings.groups.len(),
        namespace = %settings.namespace,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::REBALANCER).await;
    health_registry.register(components::SCALER).await;
    health_registry.register(components::ORCHESTRATOR).await;

    let metrics = ControllerMetrics::new();

    let logger = StructuredLogger::new("edge-placer");
    logger.log_startup(
        CONTROLLER_VERSION,
        settings.nodes.len(),
        settings.groups.len(),
    );

    // Telemetry
    let backend = Arc::new(PrometheusBackend::new(
        &settings.prometheus_url,
        settings.query_timeout(),
    )?);
    let client = TelemetryClient::new(backend, settings.nodes.clone(), settings.query_timeout());
    let snapshots = SnapshotStore::new();

    // Orchestrator and rebalancing
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(
        KubeOrchestrator::connect(
            settings.namespace.clone(),
            settings.group_label.clone(),
            settings.groups.clone(),
        )
        .await?,
    );
    let last_stable = LastStableStore::load(settings.state_path.clone());

    let controller = Arc::new(
        MigrationController::new(
            Arc::clone(&orchestrator),
            PlacementPolicy::new(settings.thresholds.rebalance_percent),
            settings.affinity_key.clone(),
            last_stable.clone(),
        )
        .with_metrics(metrics.clone())
        .with_health(health_registry.clone()),
    );

    let supervisor = Arc::new(
        RebalanceSupervisor::builder(controller, client.clone(), settings.groups.clone())
            .window(WindowSpec::new(
                settings.sampling.samples_per_window(),
                settings.sampling.sample_every(),
            ))
            .interval(settings.sampling.rebalance_interval())
            .health(health_registry.clone())
            .metrics(metrics.clone())
            .build(),
    );

    // Admission
    let scaler = Arc::new(
        ScalerService::new(
            snapshots.clone(),
            settings.thresholds.admission_percent,
            settings.scaler.clone(),
        )
        .with_listener(supervisor.clone())
        .with_metrics(metrics.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sampling = SamplingLoop::builder(client.clone(), snapshots.clone())
        .interval(settings.sampling.interval())
        .metrics(metrics.clone())
        .health(health_registry.clone())
        .build();
    let sampling_handle = tokio::spawn(sampling.run(shutdown_tx.subscribe()));

    let monitor = OverloadMonitor::new(
        client,
        Arc::clone(&scaler),
        settings.thresholds.admission_percent,
        settings.sampling.overload_window(),
        settings.sampling.overload_interval(),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    if settings.start_rebalancer {
        supervisor.start().await;
    }

    // External scaler gRPC server
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], settings.scaler.port));
    let grpc_service =
        ExternalScalerServer::new(ScalerGrpc::new(Arc::clone(&scaler)).with_metrics(metrics.clone()));
    let mut grpc_shutdown = shutdown_tx.subscribe();
    let grpc_health = health_registry.clone();
    info!(addr = %grpc_addr, "Starting external scaler server");
    let grpc_handle = tokio::spawn(async move {
        let served = tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "External scaler server failed");
            grpc_health
                .record_failure(components::SCALER, e.to_string())
                .await;
        }
    });

    // Health, metrics and state API
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        snapshots,
        orchestrator,
        last_stable,
    ));
    let api_handle = tokio::spawn(api::serve(
        settings.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    supervisor.stop().await;

    let _ = sampling_handle.await;
    let _ = monitor_handle.await;
    let _ = grpc_handle.await;
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
