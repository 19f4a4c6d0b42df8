//! Required node affinity of a ScaledJob template

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// `key In [values]` under `requiredDuringSchedulingIgnoredDuringExecution`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAffinity {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

impl NodeAffinity {
    /// Pin to a single node
    pub fn pin(key: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: "In".to_string(),
            values: vec![node.into()],
        }
    }

    /// Whether this expression already pins exactly `node` under `key`
    pub fn pins(&self, key: &str, node: &str) -> bool {
        self.key == key && self.operator == "In" && self.values.len() == 1 && self.values[0] == node
    }

    /// Read the first match expression from a ScaledJob's body
    pub fn from_scaled_job(body: &Value) -> Option<Self> {
        let expr = body.pointer(
            "/spec/jobTargetRef/template/spec/affinity/nodeAffinity/\
             requiredDuringSchedulingIgnoredDuringExecution/nodeSelectorTerms/0/matchExpressions/0",
        )?;
        serde_json::from_value(expr.clone()).ok()
    }

    /// JSON merge patch replacing the required node affinity
    pub fn to_merge_patch(&self) -> Value {
        json!({
            "spec": {
                "jobTargetRef": {
                    "template": {
                        "spec": {
                            "affinity": {
                                "nodeAffinity": {
                                    "requiredDuringSchedulingIgnoredDuringExecution": {
                                        "nodeSelectorTerms": [
                                            { "matchExpressions": [self] }
                                        ]
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
