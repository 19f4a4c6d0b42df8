use crate::models::{Placement, Workload, WorkloadPhase};
use std::collections::{BTreeMap, HashSet};

/// Pick the instance to move off `node`.
///
/// Only groups with at least two active instances on the node qualify,
/// and groups in `exclude` are skipped. Running instances are preferred
/// over pending ones; remaining ties resolve by pod name.
pub fn select_victim<'a>(
    placement: &'a Placement,
    node: &str,
    exclude: &HashSet<String>,
) -> Option<&'a Workload> {
    let mut per_group: BTreeMap<&str, Vec<&Workload>> = BTreeMap::new();
    for w in placement.on_node(node) {
        if !exclude.contains(&w.group) {
            per_group.entry(w.group.as_str()).or_default().push(w);
        }
    }

    per_group
        .into_values()
        .filter(|instances| instances.len() >= 2)
        .flatten()
        .min_by(|a, b| {
            phase_rank(a.phase)
                .cmp(&phase_rank(b.phase))
                .then_with(|| a.name.cmp(&b.name))
        })
}

fn phase_rank(phase: WorkloadPhase) -> u8 {
    match phase {
        WorkloadPhase::Running => 0,
        _ => 1,
    }
}
