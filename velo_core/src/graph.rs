//! Dependency graph construction (C7, spec §4.6).
//!
//! Builds the transitive runtime-dependency closure of a root formula and
//! the adjacency structure the planner (C8) turns into an install order.
//! Grounded in the teacher's `resolve.rs`, split here into graph
//! construction vs. ordering so each half can be tested independently.

use crate::bottle;
use crate::context::Paths;
use crate::formula::Formula;
use crate::host::HostIdentity;
use crate::Error;
use std::collections::{BTreeMap, BTreeSet};

/// A formula's runtime-dependency adjacency, restricted to the closure of
/// some root. Edges point from a package to the dependencies it requires.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyGraph {
    pub nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn dependencies_of(&self, name: &str) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.edges.get(name).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outstanding-prerequisite count per node for Kahn's algorithm: how many
    /// of `name`'s own runtime dependencies haven't been placed in the order
    /// yet. A node is ready to install once this reaches zero. This is the
    /// node's out-degree in `edges` (its dependency count), not its
    /// in-degree — a leaf with no dependencies starts ready at 0, and the
    /// root, which depends on everything, starts highest.
    fn indegrees(&self) -> BTreeMap<String, usize> {
        self.nodes.iter().map(|n| (n.clone(), self.edges.get(n).map(|deps| deps.len()).unwrap_or(0))).collect()
    }

    /// Direct dependents of `name` within this graph (the reverse edge set),
    /// used by the planner's cycle-breaking step and by uninstall's
    /// "still depended on by" check.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(name))
            .map(|(pkg, _)| pkg.clone())
            .collect()
    }
}

/// Computes the transitive closure of `root`'s runtime dependencies via a
/// depth-first walk, then builds the restricted adjacency graph over it.
///
/// A dependency missing from `formulas` is not an error unless it is the
/// root itself: taps occasionally reference a formula from a tap that
/// isn't indexed locally, and the installer can still proceed with a
/// partial graph as long as every *installable* package resolves.
pub fn build_graph(root: &str, formulas: &BTreeMap<String, Formula>) -> Result<DependencyGraph, Error> {
    if !formulas.contains_key(root) {
        return Err(Error::FormulaNotFound {
            name: root.to_string(),
            suggestions: suggest_similar(root, formulas),
        });
    }

    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![root.to_string()];

    while let Some(name) = stack.pop() {
        if !closure.insert(name.clone()) {
            continue;
        }
        let Some(formula) = formulas.get(&name) else {
            continue;
        };
        for dep in formula.runtime_dependency_names() {
            if formulas.contains_key(dep) {
                stack.push(dep.to_string());
            } else {
                eprintln!("warning: '{name}' depends on unindexed formula '{dep}'; skipping edge");
            }
        }
    }

    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in &closure {
        let Some(formula) = formulas.get(name) else { continue };
        let mut deps: BTreeSet<String> = BTreeSet::new();
        for dep in formula.required_dependencies() {
            if !closure.contains(&dep.name) {
                continue;
            }
            deps.insert(dep.name.clone());
        }
        edges.insert(name.clone(), deps);
    }

    Ok(DependencyGraph { nodes: closure, edges })
}

fn suggest_similar(name: &str, formulas: &BTreeMap<String, Formula>) -> Vec<String> {
    formulas
        .keys()
        .filter(|candidate| candidate.starts_with(name) || name.starts_with(candidate.as_str()))
        .take(3)
        .cloned()
        .collect()
}

/// Internal accessor the planner uses to run Kahn's algorithm without
/// duplicating the indegree computation.
pub(crate) fn indegrees_of(graph: &DependencyGraph) -> BTreeMap<String, usize> {
    graph.indegrees()
}

pub(crate) fn edges_of(graph: &DependencyGraph) -> &BTreeMap<String, BTreeSet<String>> {
    &graph.edges
}

/// One graph node's resolved state (spec §4.6): the formula it names, and
/// whether it's already installed (equivalence-aware) or installable (has a
/// bottle this host can use).
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub formula: Formula,
    /// The installed Cellar entry satisfying this name, if any; may differ
    /// from the node's own name when satisfied via an `@version` slot.
    pub installed_name: Option<String>,
    pub installable: bool,
}

impl ResolvedNode {
    pub fn is_installed(&self) -> bool {
        self.installed_name.is_some()
    }
}

/// The graph plus the per-node `is_installed`/`installable` facts a planner
/// needs, and the derived views spec §4.6 names. Built once per install
/// request since `is_installed` depends on the Path layout at call time.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    nodes: BTreeMap<String, ResolvedNode>,
}

impl Resolution {
    /// Resolves every node in `graph` against `formulas`, `paths` (for
    /// equivalence-aware `is_installed`), and `host` (for `installable`).
    pub fn build(
        graph: &DependencyGraph,
        formulas: &BTreeMap<String, Formula>,
        paths: &Paths,
        host: &HostIdentity,
    ) -> Self {
        let mut nodes = BTreeMap::new();
        for name in &graph.nodes {
            let Some(formula) = formulas.get(name) else { continue };
            let installed_name = paths.equivalent_installed_name(name);
            let installable = bottle::select_bottle(formula, host).is_ok();
            nodes.insert(
                name.clone(),
                ResolvedNode {
                    formula: formula.clone(),
                    installed_name,
                    installable,
                },
            );
        }
        Resolution { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes.get(name)
    }

    /// True if `name` or one of its `@version` slots is already installed.
    pub fn is_equivalent_installed(&self, name: &str) -> bool {
        self.nodes.get(name).map(|n| n.is_installed()).unwrap_or(false)
    }

    /// The installed Cellar entry satisfying `name`, if any (see
    /// [`ResolvedNode::installed_name`]).
    pub fn equivalent_installed_name(&self, name: &str) -> Option<&str> {
        self.nodes.get(name)?.installed_name.as_deref()
    }

    pub fn all_packages(&self) -> Vec<&str> {
        self.nodes.keys().map(|s| s.as_str()).collect()
    }

    pub fn new_packages(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_installed())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn installable_packages(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.installable)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn uninstallable_packages(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.installable)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Bottle, Dependency, Platform};
    use crate::host::Arch;

    fn formula(name: &str, deps: &[&str]) -> Formula {
        Formula {
            name: name.to_string(),
            source_url: format!("https://example.com/{name}.tar.gz"),
            source_sha256: "a".repeat(64),
            version: "1.0.0".to_string(),
            dependencies: deps.iter().map(|d| Dependency::required(*d)).collect(),
            ..Default::default()
        }
    }

    fn formulas_map(formulas: Vec<Formula>) -> BTreeMap<String, Formula> {
        formulas.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    #[test]
    fn closure_includes_transitive_dependencies() {
        let formulas = formulas_map(vec![
            formula("a", &["b"]),
            formula("b", &["c"]),
            formula("c", &[]),
        ]);
        let graph = build_graph("a", &formulas).unwrap();
        assert_eq!(graph.nodes, BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
        assert_eq!(graph.dependencies_of("a"), &BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn missing_root_is_formula_not_found() {
        let formulas = formulas_map(vec![formula("a", &[])]);
        let err = build_graph("zzz", &formulas).unwrap_err();
        assert!(matches!(err, Error::FormulaNotFound { .. }));
    }

    #[test]
    fn missing_dependency_is_skipped_not_errored() {
        let formulas = formulas_map(vec![formula("a", &["missing"])]);
        let graph = build_graph("a", &formulas).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn diamond_dependency_deduplicates() {
        let formulas = formulas_map(vec![
            formula("a", &["b", "c"]),
            formula("b", &["d"]),
            formula("c", &["d"]),
            formula("d", &[]),
        ]);
        let graph = build_graph("a", &formulas).unwrap();
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn version_constraints_are_recorded_but_not_enforced_at_build_time() {
        use crate::formula::{ConstraintOp, VersionConstraint};

        let mut a = formula("a", &[]);
        a.dependencies.push(Dependency {
            name: "b".to_string(),
            kind: crate::formula::DependencyKind::Required,
            constraints: vec![VersionConstraint { op: ConstraintOp::Ge, version: "2.0.0".to_string() }],
        });
        let formulas = formulas_map(vec![a, formula("b", &[])]);

        let graph = build_graph("a", &formulas).unwrap();
        assert_eq!(graph.dependencies_of("a"), &BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn dependents_of_reports_reverse_edges() {
        let formulas = formulas_map(vec![formula("a", &["b"]), formula("b", &[])]);
        let graph = build_graph("a", &formulas).unwrap();
        assert_eq!(graph.dependents_of("b"), BTreeSet::from(["a".to_string()]));
    }

    fn bottled_formula(name: &str, deps: &[&str]) -> Formula {
        let mut f = formula(name, deps);
        f.bottles.push(Bottle { sha256: "b".repeat(64), platform: Platform::Arm64Sonoma });
        f
    }

    fn tempdir() -> (std::path::PathBuf, Paths) {
        let dir = std::env::temp_dir().join(format!(
            "velo-graph-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let paths = Paths::new(&dir);
        paths.ensure_directories().unwrap();
        (dir, paths)
    }

    #[test]
    fn resolution_marks_equivalent_slot_as_installed() {
        let formulas = formulas_map(vec![bottled_formula("python", &[])]);
        let graph = build_graph("python", &formulas).unwrap();
        let (dir, paths) = tempdir();
        std::fs::create_dir_all(paths.package_dir("python@3.11", "3.11.6")).unwrap();

        let host = HostIdentity::with_values(Arch::Arm64, 14);
        let resolution = Resolution::build(&graph, &formulas, &paths, &host);

        assert!(resolution.is_equivalent_installed("python"));
        assert_eq!(resolution.new_packages(), Vec::<&str>::new());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn resolution_separates_installable_from_uninstallable() {
        let mut uninstallable = formula("no-bottle", &[]);
        uninstallable.bottles.clear();
        let formulas = formulas_map(vec![bottled_formula("has-bottle", &[]), uninstallable]);
        let graph_a = build_graph("has-bottle", &formulas).unwrap();
        let graph_b = build_graph("no-bottle", &formulas).unwrap();
        let (dir, paths) = tempdir();
        let host = HostIdentity::with_values(Arch::Arm64, 14);

        let resolution_a = Resolution::build(&graph_a, &formulas, &paths, &host);
        assert_eq!(resolution_a.installable_packages(), vec!["has-bottle"]);
        assert!(resolution_a.uninstallable_packages().is_empty());

        let resolution_b = Resolution::build(&graph_b, &formulas, &paths, &host);
        assert_eq!(resolution_b.uninstallable_packages(), vec!["no-bottle"]);
        assert!(resolution_b.all_packages().contains(&"no-bottle"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
