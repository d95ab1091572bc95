//! Install ordering (C8, spec §4.7).
//!
//! Turns a [`DependencyGraph`] into a concrete install order via Kahn's
//! algorithm: dependencies always precede their dependents, and the order
//! is deterministic (ties break alphabetically) so the same graph always
//! plans the same way.
//!
//! Departure from the teacher: `resolve.rs` treats a leftover cycle as a
//! hard `Error::DependencyCycle`. Per spec §9, a cycle here instead breaks
//! at the alphabetically-first remaining node — its edge into the cycle is
//! dropped with a warning — so a tap with a dependency mistake still
//! produces *an* installable order rather than aborting the whole install.

use crate::graph::{edges_of, indegrees_of, DependencyGraph};
use std::collections::BTreeSet;

/// A concrete install order: each entry's dependencies all appear earlier
/// in the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub order: Vec<String>,
}

impl InstallPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Produces a topological install order over `graph`. Always succeeds:
/// a cyclic subgraph degrades to a deterministic best-effort order with a
/// warning printed for each broken edge, rather than failing the plan.
pub fn plan_install_order(graph: &DependencyGraph) -> InstallPlan {
    let edges = edges_of(graph);
    let mut indegree = indegrees_of(graph);

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| name.clone())
        .collect();

    let mut order = Vec::with_capacity(graph.len());

    while order.len() < graph.len() {
        let next = match ready.iter().next().cloned() {
            Some(name) => {
                ready.take(&name);
                name
            }
            None => break_cycle(&indegree, edges, &order),
        };

        order.push(next.clone());
        indegree.remove(&next);

        if let Some(dependents) = reverse_edges(edges).get(&next) {
            for dependent in dependents {
                if let Some(count) = indegree.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
    }

    InstallPlan { order }
}

/// Picks the alphabetically-first node still blocked by a cycle, warns,
/// and returns it so the caller can force it into the order anyway.
fn break_cycle(
    indegree: &std::collections::BTreeMap<String, usize>,
    edges: &std::collections::BTreeMap<String, BTreeSet<String>>,
    already_ordered: &[String],
) -> String {
    let ordered: BTreeSet<&str> = already_ordered.iter().map(|s| s.as_str()).collect();
    let chosen = indegree
        .keys()
        .filter(|name| !ordered.contains(name.as_str()))
        .min()
        .cloned()
        .expect("cycle break requested with no remaining nodes");

    let remaining_deps: Vec<&String> = edges
        .get(&chosen)
        .into_iter()
        .flatten()
        .filter(|dep| !ordered.contains(dep.as_str()))
        .collect();

    eprintln!(
        "warning: dependency cycle detected involving '{chosen}'; breaking at this node (unresolved edges: {:?})",
        remaining_deps
    );

    chosen
}

fn reverse_edges(
    edges: &std::collections::BTreeMap<String, BTreeSet<String>>,
) -> std::collections::BTreeMap<String, BTreeSet<String>> {
    let mut reverse: std::collections::BTreeMap<String, BTreeSet<String>> = std::collections::BTreeMap::new();
    for (name, deps) in edges {
        for dep in deps {
            reverse.entry(dep.clone()).or_default().insert(name.clone());
        }
    }
    reverse
}
