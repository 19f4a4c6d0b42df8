//! Placement policy
//!
//! Pure decision logic over a single consistent utilization snapshot:
//! node classification, destination choice with uniform random
//! tie-breaking, stability suppression against the last stable node,
//! steady-state rebalancing and the cold-start spread plan.

mod rebalance;
mod spread;

pub use rebalance::select_victim;
pub use spread::{plan_initial_spread, SpreadError, SpreadPlan};

use crate::models::{Placement, PlacementIntent, UtilizationSnapshot};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Nodes split by a utilization threshold.
///
/// Both lists are sorted by utilization, ascending for `underloaded` and
/// descending for `overloaded`. Absent nodes appear in neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub underloaded: Vec<(String, f64)>,
    pub overloaded: Vec<(String, f64)>,
}

impl Classification {
    pub fn underloaded_names(&self) -> Vec<String> {
        self.underloaded.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn overloaded_names(&self) -> Vec<String> {
        self.overloaded.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Underloaded means `utilization <= threshold`, overloaded `> threshold`
pub fn classify(snapshot: &UtilizationSnapshot, threshold: f64) -> Classification {
    let mut class = Classification::default();
    for (node, value) in snapshot.iter() {
        if value <= threshold {
            class.underloaded.push((node.to_string(), value));
        } else {
            class.overloaded.push((node.to_string(), value));
        }
    }
    class.underloaded.sort_by(|a, b| a.1.total_cmp(&b.1));
    class.overloaded.sort_by(|a, b| b.1.total_cmp(&a.1));
    class
}

/// Pick the minimum-utilization candidate; ties are broken uniformly at random
pub fn choose_destination<R: Rng + ?Sized>(
    candidates: &[(String, f64)],
    rng: &mut R,
) -> Option<String> {
    let min = candidates
        .iter()
        .map(|(_, v)| *v)
        .min_by(|a, b| a.total_cmp(b))?;
    let tied: Vec<&String> = candidates
        .iter()
        .filter(|(_, v)| *v == min)
        .map(|(n, _)| n)
        .collect();
    tied.choose(rng).map(|n| (*n).clone())
}

/// Why a cycle produced no migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "node", rename_all = "snake_case")]
pub enum NoActionReason {
    /// Nothing above the rebalancing threshold
    NoOverloaded,
    /// No node at or below the threshold to receive instances
    NoUnderloaded,
    /// The best destination equals the last stable node
    StableDestination(String),
    /// Overloaded nodes host no group with an instance to spare
    NoMovableInstance,
}

impl fmt::Display for NoActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoActionReason::NoOverloaded => f.write_str("no overloaded node"),
            NoActionReason::NoUnderloaded => f.write_str("no underloaded node"),
            NoActionReason::StableDestination(node) => {
                write!(f, "destination {} unchanged since last migration", node)
            }
            NoActionReason::NoMovableInstance => {
                f.write_str("no overloaded node hosts a group with two or more instances")
            }
        }
    }
}

/// Outcome of one decision cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoAction(NoActionReason),
    Migrate(Vec<PlacementIntent>),
}

/// Rebalancing policy for one threshold
#[derive(Debug, Clone, Copy)]
pub struct PlacementPolicy {
    threshold: f64,
}

impl PlacementPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, snapshot: &UtilizationSnapshot) -> Classification {
        classify(snapshot, self.threshold)
    }

    /// Decide this cycle's migrations.
    ///
    /// At most one instance leaves each overloaded node, and each group
    /// moves at most once, all toward the single best destination.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        snapshot: &UtilizationSnapshot,
        placement: &Placement,
        last_stable: Option<&str>,
        rng: &mut R,
    ) -> Decision {
        let class = self.classify(snapshot);
        if class.overloaded.is_empty() {
            return Decision::NoAction(NoActionReason::NoOverloaded);
        }

        let destination = match choose_destination(&class.underloaded, rng) {
            Some(node) => node,
            None => return Decision::NoAction(NoActionReason::NoUnderloaded),
        };

        if last_stable == Some(destination.as_str()) {
            return Decision::NoAction(NoActionReason::StableDestination(destination));
        }

        let mut moved: HashSet<String> = HashSet::new();
        let mut intents = Vec::new();
        for (node, _) in &class.overloaded {
            if let Some(victim) = select_victim(placement, node, &moved) {
                moved.insert(victim.group.clone());
                intents.push(
                    PlacementIntent::new(&victim.group, node, &destination)
                        .with_job(victim.job.clone()),
                );
            }
        }

        if intents.is_empty() {
            Decision::NoAction(NoActionReason::NoMovableInstance)
        } else {
            Decision::Migrate(intents)
        }
    }
}
