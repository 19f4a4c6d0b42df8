//! Last stable node
//!
//! The only state that survives a restart. It is advisory: it suppresses
//! re-patching toward a node that was already chosen, and the live
//! placement read from the orchestrator always wins over it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StableRecord {
    node: Option<String>,
    updated_at: DateTime<Utc>,
}

/// File-backed holder of the last stable node
#[derive(Debug, Clone)]
pub struct LastStableStore {
    path: Option<PathBuf>,
    current: Arc<RwLock<Option<String>>>,
}

impl LastStableStore {
    /// A store that is never persisted
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Load from `path`. A missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let node = match read_record(&path) {
            Ok(record) => record.and_then(|r| r.node),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable last stable node");
                None
            }
        };
        Self {
            path: Some(path),
            current: Arc::new(RwLock::new(node)),
        }
    }

    pub fn get(&self) -> Option<String> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the value and persist it when it changed
    pub fn set(&self, node: Option<String>) -> Result<()> {
        {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *guard == node {
                return Ok(());
            }
            *guard = node.clone();
        }

        if let Some(path) = &self.path {
            write_record(
                path,
                &StableRecord {
                    node,
                    updated_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<Option<StableRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(record))
}

/// Write through a sibling temp file and rename over the target
fn write_record(path: &Path, record: &StableRecord) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(record)?;
    std::fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
