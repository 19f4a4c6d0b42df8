use super::AdmissionListener;
use crate::models::UtilizationSnapshot;
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::settings::{MetricKind, ScalerSettings};
use crate::telemetry::SnapshotStore;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Nodes strictly below `threshold`
pub fn admissible_nodes(snapshot: &UtilizationSnapshot, threshold: f64) -> Vec<String> {
    snapshot
        .iter()
        .filter(|(_, u)| *u < threshold)
        .map(|(n, _)| n.to_string())
        .collect()
}

/// Sum of `max(0, 100 - u)` over admissible nodes
pub fn spare_capacity(snapshot: &UtilizationSnapshot, threshold: f64) -> f64 {
    snapshot
        .iter()
        .filter(|(_, u)| *u < threshold)
        .map(|(_, u)| (100.0 - u).max(0.0))
        .sum()
}

/// Admission decisions and scaler metric values
pub struct ScalerService {
    store: SnapshotStore,
    threshold: f64,
    settings: ScalerSettings,
    /// Last reported admission; `None` until the first evaluation
    last: Mutex<Option<bool>>,
    transitions: Option<mpsc::UnboundedSender<bool>>,
    listener: Option<Arc<dyn AdmissionListener>>,
    metrics: Option<ControllerMetrics>,
    logger: StructuredLogger,
}

impl ScalerService {
    pub fn new(store: SnapshotStore, threshold: f64, settings: ScalerSettings) -> Self {
        Self {
            store,
            threshold,
            settings,
            last: Mutex::new(None),
            transitions: None,
            listener: None,
            metrics: None,
            logger: StructuredLogger::new("scaler"),
        }
    }

    /// Deliver admission transitions to `listener`, one at a time and in
    /// order. While inactive, an incomplete teardown is re-issued on the
    /// next evaluation. Must be called from within a Tokio runtime.
    pub fn with_listener(mut self, listener: Arc<dyn AdmissionListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        self.listener = Some(Arc::clone(&listener));
        tokio::spawn(async move {
            while let Some(active) = rx.recv().await {
                if active {
                    listener.activated().await;
                } else {
                    listener.deactivated().await;
                }
            }
        });
        self.transitions = Some(tx);
        self
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metric_name(&self) -> &str {
        &self.settings.metric_name
    }

    /// Whether any node is below the admission threshold right now.
    ///
    /// False before the first sampling pass, without side effects.
    pub async fn is_active(&self) -> bool {
        let view = self.store.current().await;
        if !view.is_initialized() {
            return false;
        }
        self.evaluate(&view.snapshot)
    }

    /// Evaluate admission for `snapshot` and notify on transitions.
    ///
    /// An empty snapshot says nothing about capacity: it reports inactive
    /// but leaves the admission state untouched.
    pub fn evaluate(&self, snapshot: &UtilizationSnapshot) -> bool {
        if snapshot.is_empty() {
            debug!("No node sampled, admission state unchanged");
            return false;
        }

        let admissible = admissible_nodes(snapshot, self.threshold);
        let active = !admissible.is_empty();

        // Held until the notification is queued: the listener sees
        // transitions in the order the state changed.
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if *last != Some(active) {
            *last = Some(active);
            self.logger.log_admission(active, admissible.len());
            if let Some(metrics) = &self.metrics {
                metrics.set_admission_active(active);
            }
            self.notify(active);
        } else if !active
            && self
                .listener
                .as_ref()
                .is_some_and(|l| l.take_teardown_pending())
        {
            debug!("Previous teardown incomplete, retrying");
            self.notify(false);
        }
        active
    }

    fn notify(&self, active: bool) {
        if let Some(tx) = &self.transitions {
            let _ = tx.send(active);
        }
    }

    /// Target size of one metric unit per instance
    pub fn target_size(&self) -> i64 {
        1
    }

    /// Current metric value from the cached snapshot
    pub async fn metric_value(&self) -> f64 {
        let view = self.store.current().await;
        match self.settings.metric_kind {
            MetricKind::SpareCapacity => spare_capacity(&view.snapshot, self.threshold),
            MetricKind::AvailableNodes => {
                admissible_nodes(&view.snapshot, self.threshold).len() as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeTelemetry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot(values: &[(&str, f64)]) -> UtilizationSnapshot {
        values.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    async fn store_with(values: &[(&str, f64)]) -> SnapshotStore {
        let store = SnapshotStore::new();
        store
            .publish(
                values
                    .iter()
                    .map(|(n, v)| NodeTelemetry {
                        node: n.to_string(),
                        metric: "gpu".into(),
                        instance: format!("{}:9100", n),
                        value: *v,
                        sampled_at: Utc::now(),
                    })
                    .collect(),
            )
            .await;
        store
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl AdmissionListener for Recorder {
        async fn activated(&self) {
            self.events.lock().unwrap().push(true);
        }

        async fn deactivated(&self) {
            self.events.lock().unwrap().push(false);
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_spare_capacity_counts_admissible_only() {
        let snap = snapshot(&[("a", 95.0), ("b", 92.0)]);
        assert_eq!(spare_capacity(&snap, 90.0), 0.0);

        let snap = snapshot(&[("a", 95.0), ("b", 40.0), ("c", 70.0)]);
        assert_eq!(spare_capacity(&snap, 90.0), 90.0);
    }

    #[tokio::test]
    async fn test_inactive_before_first_pass() {
        let recorder = Arc::new(Recorder::default());
        let service = ScalerService::new(SnapshotStore::new(), 90.0, ScalerSettings::default())
            .with_listener(recorder.clone());

        assert!(!service.is_active().await);
        settle().await;
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saturated_nodes_deactivate_once() {
        let recorder = Arc::new(Recorder::default());
        let store = store_with(&[("a", 95.0), ("b", 92.0)]).await;
        let service =
            ScalerService::new(store, 90.0, ScalerSettings::default()).with_listener(recorder.clone());

        assert!(!service.is_active().await);
        assert!(!service.is_active().await);
        assert_eq!(service.metric_value().await, 0.0);
        settle().await;
        assert_eq!(*recorder.events.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_transitions_delivered_in_order() {
        let recorder = Arc::new(Recorder::default());
        let service = ScalerService::new(SnapshotStore::new(), 90.0, ScalerSettings::default())
            .with_listener(recorder.clone());

        assert!(service.evaluate(&snapshot(&[("a", 10.0)])));
        assert!(!service.evaluate(&snapshot(&[("a", 99.0)])));
        assert!(service.evaluate(&snapshot(&[("a", 50.0)])));
        assert!(service.evaluate(&snapshot(&[("a", 60.0)])));
        settle().await;
        assert_eq!(*recorder.events.lock().unwrap(), vec![true, false, true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluations_end_on_final_state() {
        let recorder = Arc::new(Recorder::default());
        let service = Arc::new(
            ScalerService::new(SnapshotStore::new(), 90.0, ScalerSettings::default())
                .with_listener(recorder.clone()),
        );

        for _ in 0..20 {
            let mut handles = Vec::new();
            for i in 0..8 {
                let service = Arc::clone(&service);
                handles.push(tokio::spawn(async move {
                    let value = if i % 2 == 0 { 10.0 } else { 99.0 };
                    service.evaluate(&snapshot(&[("a", value)]));
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
        }
        settle().await;

        let events = recorder.events.lock().unwrap().clone();
        let last = *service.last.lock().unwrap();
        assert!(!events.is_empty());
        assert_eq!(events.last().copied(), last);
        assert!(events.windows(2).all(|w| w[0] != w[1]));
    }

    #[tokio::test]
    async fn test_empty_snapshot_keeps_state() {
        let recorder = Arc::new(Recorder::default());
        let service = ScalerService::new(SnapshotStore::new(), 90.0, ScalerSettings::default())
            .with_listener(recorder.clone());

        assert!(service.evaluate(&snapshot(&[("a", 10.0)])));
        assert!(!service.evaluate(&UtilizationSnapshot::default()));
        assert!(service.evaluate(&snapshot(&[("a", 20.0)])));
        settle().await;
        assert_eq!(*recorder.events.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_available_nodes_metric() {
        let store = store_with(&[("a", 95.0), ("b", 40.0), ("c", 10.0)]).await;
        let settings = ScalerSettings {
            metric_kind: MetricKind::AvailableNodes,
            ..ScalerSettings::default()
        };
        let service = ScalerService::new(store, 90.0, settings);
        assert_eq!(service.metric_value().await, 2.0);
        assert_eq!(service.target_size(), 1);
        assert_eq!(service.metric_name(), "gpu_trigger");
    }
}
