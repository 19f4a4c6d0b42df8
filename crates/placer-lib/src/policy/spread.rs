//! Cold-start spread of workload groups over sampled nodes

use crate::models::UtilizationSnapshot;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpreadError {
    #[error("no node returned a utilization sample")]
    NoEligibleNodes,
}

/// Planned node for every workload group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadPlan {
    /// Instances per node
    pub counts: BTreeMap<String, usize>,
    /// `(group, node)` in input group order
    pub assignments: Vec<(String, String)>,
}

/// Spread `groups` evenly over the nodes present in `snapshot`.
///
/// Every node gets `N / M` groups; the `N % M` remainder goes to the
/// least utilized nodes, with a random order among equal utilization.
/// Groups are then dealt out in rounds over nodes in ascending
/// utilization so consecutive groups land on different nodes.
pub fn plan_initial_spread<R: Rng + ?Sized>(
    groups: &[String],
    snapshot: &UtilizationSnapshot,
    rng: &mut R,
) -> Result<SpreadPlan, SpreadError> {
    if snapshot.is_empty() {
        return Err(SpreadError::NoEligibleNodes);
    }

    let n = groups.len();
    let m = snapshot.len();
    let base = n / m;
    let mut extra = n % m;

    let mut counts: BTreeMap<String, usize> =
        snapshot.iter().map(|(node, _)| (node.to_string(), base)).collect();

    for node in ordered_by_usage(snapshot, rng) {
        if extra == 0 {
            break;
        }
        if let Some(count) = counts.get_mut(&node) {
            *count += 1;
        }
        extra -= 1;
    }

    let mut remaining = counts.clone();
    let rounds = counts.values().copied().max().unwrap_or(0);
    let mut slots = Vec::with_capacity(n);
    for _ in 0..rounds {
        for node in ordered_by_usage(snapshot, rng) {
            if let Some(left) = remaining.get_mut(&node) {
                if *left > 0 {
                    *left -= 1;
                    slots.push(node);
                }
            }
        }
    }

    let assignments = groups.iter().cloned().zip(slots).collect();
    Ok(SpreadPlan {
        counts,
        assignments,
    })
}

/// Nodes in ascending utilization, shuffled within equal values
fn ordered_by_usage<R: Rng + ?Sized>(snapshot: &UtilizationSnapshot, rng: &mut R) -> Vec<String> {
    let mut buckets: Vec<(f64, Vec<String>)> = Vec::new();
    let mut sorted: Vec<(&str, f64)> = snapshot.iter().collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    for (node, value) in sorted {
        match buckets.last_mut() {
            Some((v, bucket)) if *v == value => bucket.push(node.to_string()),
            _ => buckets.push((value, vec![node.to_string()])),
        }
    }

    buckets
        .into_iter()
        .flat_map(|(_, mut bucket)| {
            bucket.shuffle(rng);
            bucket
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn groups(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("posture-pi{}", i)).collect()
    }

    fn snapshot(values: &[(&str, f64)]) -> UtilizationSnapshot {
        values.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_even_split_with_remainder_to_lowest() {
        let snap = snapshot(&[("agx", 40.0), ("orin", 10.0), ("nano", 70.0)]);
        let mut rng = StdRng::seed_from_u64(5);
        let plan = plan_initial_spread(&groups(11), &snap, &mut rng).unwrap();

        assert_eq!(plan.counts["orin"], 4);
        assert_eq!(plan.counts["agx"], 4);
        assert_eq!(plan.counts["nano"], 3);
        assert_eq!(plan.assignments.len(), 11);
    }

    #[test]
    fn test_counts_match_assignments() {
        let snap = snapshot(&[("a", 5.0), ("b", 5.0), ("c", 5.0), ("d", 90.0)]);
        let mut rng = StdRng::seed_from_u64(11);
        let plan = plan_initial_spread(&groups(7), &snap, &mut rng).unwrap();

        let mut assigned: BTreeMap<String, usize> = BTreeMap::new();
        for (_, node) in &plan.assignments {
            *assigned.entry(node.clone()).or_default() += 1;
        }
        assert_eq!(assigned.get("d").copied().unwrap_or(0), 1);
        let planned: BTreeMap<String, usize> = plan
            .counts
            .clone()
            .into_iter()
            .filter(|(_, c)| *c > 0)
            .collect();
        assert_eq!(assigned, planned);
        let max = plan.counts.values().max().unwrap();
        let min = plan.counts.values().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_rounds_spread_consecutive_groups() {
        let snap = snapshot(&[("a", 10.0), ("b", 20.0)]);
        let mut rng = StdRng::seed_from_u64(0);
        let plan = plan_initial_spread(&groups(4), &snap, &mut rng).unwrap();

        let nodes: Vec<&str> = plan.assignments.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(nodes, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_remainder_tie_is_random() {
        let snap = snapshot(&[("a", 10.0), ("b", 10.0)]);
        let mut seen = std::collections::HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_initial_spread(&groups(1), &snap, &mut rng).unwrap();
            seen.insert(plan.assignments[0].1.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_fewer_groups_than_nodes() {
        let snap = snapshot(&[("a", 30.0), ("b", 10.0), ("c", 20.0)]);
        let mut rng = StdRng::seed_from_u64(2);
        let plan = plan_initial_spread(&groups(2), &snap, &mut rng).unwrap();
        assert_eq!(plan.counts["a"], 0);
        let nodes: Vec<&str> = plan.assignments.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(nodes, vec!["b", "c"]);
    }

    #[test]
    fn test_empty_snapshot_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            plan_initial_spread(&groups(3), &UtilizationSnapshot::default(), &mut rng),
            Err(SpreadError::NoEligibleNodes)
        );
    }
}
