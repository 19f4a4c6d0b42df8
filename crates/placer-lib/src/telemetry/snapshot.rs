//! Shared utilization snapshot
//!
//! The sampling loop is the only writer. Readers take an `Arc` to the
//! current view and never observe a partially updated snapshot.

use crate::models::{NodeTelemetry, UtilizationSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Immutable result of one sampling pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotView {
    /// Monotonic pass counter; 0 means no pass has completed yet
    pub pass: u64,
    pub snapshot: UtilizationSnapshot,
    pub readings: Vec<NodeTelemetry>,
}

impl SnapshotView {
    /// Whether at least one sampling pass has been published
    pub fn is_initialized(&self) -> bool {
        self.pass > 0
    }
}

/// Atomically swapped holder of the latest [`SnapshotView`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Arc<SnapshotView>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published view
    pub async fn current(&self) -> Arc<SnapshotView> {
        Arc::clone(&*self.current.read().await)
    }

    /// Publish the readings of a completed pass
    pub async fn publish(&self, readings: Vec<NodeTelemetry>) -> Arc<SnapshotView> {
        let snapshot: UtilizationSnapshot = readings
            .iter()
            .map(|r| (r.node.clone(), r.value))
            .collect();

        let mut guard = self.current.write().await;
        let view = Arc::new(SnapshotView {
            pass: guard.pass + 1,
            snapshot,
            readings,
        });
        *guard = Arc::clone(&view);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(node: &str, value: f64) -> NodeTelemetry {
        NodeTelemetry {
            node: node.to_string(),
            metric: "gpu".to_string(),
            instance: format!("{}:9100", node),
            value,
            sampled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_starts_uninitialized() {
        let store = SnapshotStore::new();
        let view = store.current().await;
        assert!(!view.is_initialized());
        assert!(view.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_readers_keep_their_view() {
        let store = SnapshotStore::new();
        store.publish(vec![reading("a", 10.0)]).await;

        let before = store.current().await;
        store.publish(vec![reading("a", 90.0), reading("b", 5.0)]).await;
        let after = store.current().await;

        assert_eq!(before.snapshot.get("a"), Some(10.0));
        assert_eq!(before.snapshot.len(), 1);
        assert_eq!(after.snapshot.get("a"), Some(90.0));
        assert_eq!(after.pass, 2);
    }
}
