//! Constraint resolution over the candidate graph.
//!
//! Picks one node per package id such that every dependency edge reachable
//! from the roots is satisfied. Roots and resident packages are pinned;
//! every other id takes the lowest candidate that fits, backtracking when a
//! later id can't be placed.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use super::graph::{DependencyGraph, DependencyNode};
use crate::error::{ConflictingRange, LoadError, Result};
use crate::package::{PackageDependency, PackageId, PackageIdentity};

type Assignment<'g> = BTreeMap<PackageId, &'g DependencyNode>;

#[derive(Debug, Default, Clone)]
pub struct ConstraintResolver {
    resident: Vec<PackageIdentity>,
}

impl ConstraintResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages already loaded by earlier requests. Each stays at its loaded
    /// version: a dependent whose range excludes it is a conflict.
    pub fn resident<I: IntoIterator<Item = PackageIdentity>>(mut self, packages: I) -> Self {
        self.resident = packages.into_iter().collect();
        self
    }

    /// Resolves the install set for `roots`, dependencies before
    /// dependents.
    pub fn resolve(
        &self,
        roots: &[PackageIdentity],
        graph: &DependencyGraph,
    ) -> Result<Vec<DependencyNode>> {
        let mut assignment = Assignment::new();
        for root in roots {
            let node = graph.get(root).ok_or_else(|| LoadError::PackageNotFound {
                package: root.to_string(),
                requirement: None,
            })?;
            assignment.insert(root.id.clone(), node);
        }
        check_pinned(roots, &assignment)?;

        // Resident packages are already loaded, so their own dependencies
        // are settled; they enter the search as leaves.
        let resident: HashMap<PackageId, DependencyNode> = self
            .resident
            .iter()
            .map(|identity| {
                let node = DependencyNode {
                    identity: identity.clone(),
                    dependencies: Vec::new(),
                    source: graph.get(identity).map_or(0, |node| node.source),
                };
                (identity.id.clone(), node)
            })
            .collect();

        let mut search = Search {
            graph,
            resident: &resident,
            failure: None,
        };
        if !search.solve(&mut assignment) {
            return Err(search.failure.unwrap_or_else(|| {
                LoadError::Internal("resolution failed without a recorded conflict".into())
            }));
        }

        let ordered = dependency_order(roots, &assignment);
        debug!(
            "Resolved install set: {}",
            ordered
                .iter()
                .map(|n| n.identity.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        check_satisfied(&ordered)?;
        Ok(ordered.into_iter().cloned().collect())
    }
}

/// Every edge between chosen nodes lands inside its range, and no id is
/// chosen twice.
fn check_satisfied(ordered: &[&DependencyNode]) -> Result<()> {
    let chosen: HashMap<&PackageId, &PackageIdentity> = ordered
        .iter()
        .map(|node| (&node.identity.id, &node.identity))
        .collect();
    if chosen.len() != ordered.len() {
        return Err(LoadError::Internal(
            "install set holds two versions of one package".into(),
        ));
    }
    for node in ordered {
        for dependency in &node.dependencies {
            match chosen.get(&dependency.id) {
                Some(target) if dependency.range.satisfies(&target.version) => {}
                Some(target) => {
                    return Err(LoadError::Internal(format!(
                        "{} requires {} but {} was chosen",
                        node.identity, dependency, target
                    )));
                }
                None => {
                    return Err(LoadError::Internal(format!(
                        "{} requires {} which is missing from the install set",
                        node.identity, dependency
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Root pins must already agree with each other's dependency ranges.
fn check_pinned(roots: &[PackageIdentity], assignment: &Assignment<'_>) -> Result<()> {
    for node in assignment.values() {
        for dependency in &node.dependencies {
            let Some(target) = assignment.get(&dependency.id) else {
                continue;
            };
            if dependency.range.satisfies(&target.identity.version) {
                continue;
            }
            let mut ranges = conflicting_ranges(&dependency.id, assignment);
            if let Some(root) = roots.iter().find(|r| r.id == dependency.id) {
                ranges.push(ConflictingRange {
                    dependent: None,
                    range: format!("[{}]", root.version),
                });
            }
            return Err(LoadError::ResolutionConflict {
                package: dependency.id.to_string(),
                ranges,
            });
        }
    }
    Ok(())
}

/// `(dependent, range)` for every assigned node that depends on `id`.
fn constraints_on(id: &PackageId, assignment: &Assignment<'_>) -> Vec<(PackageIdentity, String)> {
    assignment
        .values()
        .flat_map(|node| {
            node.dependencies
                .iter()
                .filter(move |d| &d.id == id)
                .map(move |d| (node.identity.clone(), d.range.to_string()))
        })
        .collect()
}

struct Search<'g> {
    graph: &'g DependencyGraph,
    resident: &'g HashMap<PackageId, DependencyNode>,
    failure: Option<LoadError>,
}

impl<'g> Search<'g> {
    fn solve(&mut self, assignment: &mut Assignment<'g>) -> bool {
        let Some(id) = next_unassigned(assignment) else {
            return true;
        };

        let dependents: Vec<&'g DependencyNode> = assignment
            .values()
            .copied()
            .filter(|node| node.dependencies.iter().any(|d| d.id == id))
            .collect();

        let resident = self.resident;
        let pinned = resident.get(&id);
        let candidates = match pinned {
            Some(node) => vec![node],
            None => self.graph.versions_of(&id),
        };
        if candidates.is_empty() {
            self.record(LoadError::PackageNotFound {
                package: id.to_string(),
                requirement: Some(
                    constraints_on(&id, assignment)
                        .into_iter()
                        .map(|(_, range)| range)
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            });
            return false;
        }

        let mut blocked = None;
        for candidate in candidates {
            let fits_dependents = dependents.iter().all(|node| {
                node.dependencies
                    .iter()
                    .filter(|d| d.id == id)
                    .all(|d| d.range.satisfies(&candidate.identity.version))
            });
            if !fits_dependents {
                continue;
            }
            if let Some(clash) = first_inconsistency(candidate, assignment) {
                // The candidate itself fits, but disagrees with an earlier pick.
                blocked.get_or_insert_with(|| {
                    let mut ranges = conflicting_ranges(&clash.id, assignment);
                    ranges.push(ConflictingRange {
                        dependent: Some(candidate.identity.clone()),
                        range: clash.range.to_string(),
                    });
                    LoadError::ResolutionConflict {
                        package: clash.id.to_string(),
                        ranges,
                    }
                });
                continue;
            }

            assignment.insert(id.clone(), candidate);
            if self.solve(assignment) {
                return true;
            }
            assignment.remove(&id);
        }

        self.record(blocked.unwrap_or_else(|| {
            let mut ranges = conflicting_ranges(&id, assignment);
            if let Some(node) = pinned {
                ranges.push(ConflictingRange {
                    dependent: None,
                    range: format!("[{}]", node.identity.version),
                });
            }
            LoadError::ResolutionConflict {
                package: id.to_string(),
                ranges,
            }
        }));
        false
    }

    /// Keeps the first dead end found.
    fn record(&mut self, error: LoadError) {
        if self.failure.is_none() {
            debug!("Resolution dead end: {}", error);
            self.failure = Some(error);
        }
    }
}

/// The first id (in id order) that an assigned node depends on but that
/// has no assignment yet.
fn next_unassigned(assignment: &Assignment<'_>) -> Option<PackageId> {
    assignment
        .values()
        .flat_map(|node| node.dependencies.iter())
        .map(|d| &d.id)
        .filter(|id| !assignment.contains_key(*id))
        .min()
        .cloned()
}

/// The first edge of `candidate` that rejects what is already assigned.
fn first_inconsistency<'n>(
    candidate: &'n DependencyNode,
    assignment: &Assignment<'_>,
) -> Option<&'n PackageDependency> {
    candidate.dependencies.iter().find(|d| {
        assignment
            .get(&d.id)
            .is_some_and(|assigned| !d.range.satisfies(&assigned.identity.version))
    })
}

fn conflicting_ranges(id: &PackageId, assignment: &Assignment<'_>) -> Vec<ConflictingRange> {
    constraints_on(id, assignment)
        .into_iter()
        .map(|(dependent, range)| ConflictingRange {
            dependent: Some(dependent),
            range,
        })
        .collect()
}

/// Post-order walk from the roots so dependencies precede dependents.
fn dependency_order<'g>(
    roots: &[PackageIdentity],
    assignment: &Assignment<'g>,
) -> Vec<&'g DependencyNode> {
    let mut ordered = Vec::with_capacity(assignment.len());
    let mut visited: HashSet<PackageId> = HashSet::new();

    for root in roots {
        let Some(&node) = assignment.get(&root.id) else {
            continue;
        };
        // (node, next dependency index)
        let mut stack = vec![(node, 0usize)];
        if !visited.insert(node.identity.id.clone()) {
            continue;
        }
        while let Some((node, next)) = stack.pop() {
            match node.dependencies.get(next) {
                Some(dependency) => {
                    stack.push((node, next + 1));
                    if let Some(&child) = assignment.get(&dependency.id)
                        && visited.insert(child.identity.id.clone())
                    {
                        stack.push((child, 0));
                    }
                }
                None => ordered.push(node),
            }
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::VersionRange;
    use crate::test_utils::identity;

    fn node(id: &str, version: &str, deps: &[(&str, &str)]) -> DependencyNode {
        DependencyNode {
            identity: identity(id, version),
            dependencies: deps
                .iter()
                .map(|(d, r)| PackageDependency::new(*d, VersionRange::parse(r).unwrap()))
                .collect(),
            source: 0,
        }
    }

    fn graph(nodes: Vec<DependencyNode>) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for node in nodes {
            graph.insert(node);
        }
        graph
    }

    fn resolved(nodes: &[DependencyNode]) -> Vec<String> {
        nodes.iter().map(|n| n.identity.to_string()).collect()
    }

    /// Every edge from a resolved node lands on a resolved version inside
    /// its range.
    fn assert_valid(nodes: &[DependencyNode]) {
        for node in nodes {
            for dep in &node.dependencies {
                let target = nodes
                    .iter()
                    .find(|n| n.identity.id == dep.id)
                    .unwrap_or_else(|| panic!("{} missing from install set", dep.id));
                assert!(
                    dep.range.satisfies(&target.identity.version),
                    "{} requires {} {}, got {}",
                    node.identity,
                    dep.id,
                    dep.range,
                    target.identity.version
                );
            }
        }
        let names: HashSet<&PackageId> = nodes.iter().map(|n| &n.identity.id).collect();
        assert_eq!(names.len(), nodes.len(), "one version per package");
    }

    #[test]
    fn test_prefers_lowest_satisfying_version() {
        let g = graph(vec![
            node("A", "1.0.0", &[("B", "[1.0, )"), ("C", "1.0")]),
            node("C", "1.0.0", &[("B", "[1.5, )")]),
            node("B", "1.0.0", &[]),
            node("B", "1.5.0", &[]),
            node("B", "2.0.0", &[]),
        ]);

        let result = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap();
        assert_valid(&result);
        assert_eq!(resolved(&result), vec!["B 1.5.0", "C 1.0.0", "A 1.0.0"]);
    }

    #[test]
    fn test_backtracks_when_lowest_choice_dead_ends() {
        // D 1.0 needs E 1.x which conflicts with A's E 2.x; D 2.0 doesn't.
        let g = graph(vec![
            node("A", "1.0.0", &[("D", "[1.0, )"), ("E", "[2.0, )")]),
            node("D", "1.0.0", &[("E", "[1.0, 2.0)")]),
            node("D", "2.0.0", &[("E", "[2.0, )")]),
            node("E", "1.0.0", &[]),
            node("E", "2.0.0", &[]),
        ]);

        let result = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap();
        assert_valid(&result);
        assert_eq!(resolved(&result), vec!["E 2.0.0", "D 2.0.0", "A 1.0.0"]);
    }

    #[test]
    fn test_disjoint_ranges_conflict_names_package() {
        let g = graph(vec![
            node("A", "1.0.0", &[("B", "[1.0, )")]),
            node("C", "1.0.0", &[("B", "(, 1.0)")]),
            node("B", "0.9.0", &[]),
            node("B", "1.0.0", &[]),
        ]);

        let err = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0"), identity("C", "1.0.0")], &g)
            .unwrap_err();

        match err {
            LoadError::ResolutionConflict { package, ranges } => {
                assert_eq!(package, "B");
                let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                assert!(ranges.contains(&"A 1.0.0 requires [1.0.0, )".to_string()));
                assert!(ranges.contains(&"C 1.0.0 requires (, 1.0.0)".to_string()));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_roots_stay_pinned() {
        let g = graph(vec![
            node("A", "1.0.0", &[("B", "[2.0, )")]),
            node("B", "1.0.0", &[]),
            node("B", "2.0.0", &[]),
        ]);

        let err = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0"), identity("B", "1.0.0")], &g)
            .unwrap_err();
        match err {
            LoadError::ResolutionConflict { package, ranges } => {
                assert_eq!(package, "B");
                assert!(ranges.iter().any(|r| r.dependent.is_none()));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency_is_not_found() {
        let g = graph(vec![node("A", "1.0.0", &[("Ghost", "1.0")])]);
        let err = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap_err();
        assert!(matches!(err, LoadError::PackageNotFound { ref package, .. } if package == "Ghost"));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let err = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &DependencyGraph::new())
            .unwrap_err();
        assert!(matches!(err, LoadError::PackageNotFound { .. }));
    }

    #[test]
    fn test_cyclic_graph_orders_each_package_once() {
        let g = graph(vec![
            node("A", "1.0.0", &[("B", "1.0")]),
            node("B", "1.0.0", &[("C", "1.0")]),
            node("C", "1.0.0", &[("A", "1.0")]),
        ]);
        let result = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap();
        assert_eq!(resolved(&result), vec!["C 1.0.0", "B 1.0.0", "A 1.0.0"]);
    }

    #[test]
    fn test_unreachable_candidates_are_ignored() {
        let g = graph(vec![
            node("A", "1.0.0", &[]),
            node("Stray", "1.0.0", &[("A", "[9.0]")]),
        ]);
        let result = ConstraintResolver::new()
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap();
        assert_eq!(resolved(&result), vec!["A 1.0.0"]);
    }

    #[test]
    fn test_resident_version_is_kept() {
        let g = graph(vec![
            node("W", "1.0.0", &[("Z", "[1.0, )")]),
            node("Z", "1.0.0", &[]),
            node("Z", "1.1.0", &[]),
        ]);
        let result = ConstraintResolver::new()
            .resident([identity("Z", "1.1.0")])
            .resolve(&[identity("W", "1.0.0")], &g)
            .unwrap();
        assert_eq!(resolved(&result), vec!["Z 1.1.0", "W 1.0.0"]);
    }

    #[test]
    fn test_resident_version_outside_range_conflicts() {
        let g = graph(vec![
            node("W", "1.0.0", &[("Z", "[1.1, )")]),
            node("Z", "1.1.0", &[]),
        ]);
        let err = ConstraintResolver::new()
            .resident([identity("Z", "1.0.0")])
            .resolve(&[identity("W", "1.0.0")], &g)
            .unwrap_err();
        match err {
            LoadError::ResolutionConflict { package, ranges } => {
                assert_eq!(package, "Z");
                let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                assert_eq!(ranges, vec!["W 1.0.0 requires [1.1.0, )", "pinned to [1.0.0]"]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_residents_are_not_in_install_set() {
        let g = graph(vec![node("A", "1.0.0", &[])]);
        let result = ConstraintResolver::new()
            .resident([identity("Z", "1.0.0")])
            .resolve(&[identity("A", "1.0.0")], &g)
            .unwrap();
        assert_eq!(resolved(&result), vec!["A 1.0.0"]);
    }

    #[test]
    fn test_check_satisfied_rejects_broken_sets() {
        let a = node("A", "1.0.0", &[("B", "[2.0, )")]);
        let b1 = node("B", "1.0.0", &[]);
        let b2 = node("B", "2.0.0", &[]);

        assert!(check_satisfied(&[&b2, &a]).is_ok());
        assert!(matches!(check_satisfied(&[&b1, &a]), Err(LoadError::Internal(_))));
        assert!(matches!(check_satisfied(&[&a]), Err(LoadError::Internal(_))));
        assert!(matches!(
            check_satisfied(&[&b1, &b2, &a]),
            Err(LoadError::Internal(_))
        ));
    }

    #[test]
    fn test_random_diamonds_are_valid() {
        // A small exhaustive sweep over diamond shapes: for every pair of
        // floors the resolver either produces a valid set or a conflict.
        for left in ["1.0", "1.5", "2.0"] {
            for right in ["[1.0, 1.5)", "[1.5, 2.0]", "(2.0, )"] {
                let g = graph(vec![
                    node("Root", "1.0.0", &[("L", "1.0"), ("R", "1.0")]),
                    node("L", "1.0.0", &[("Shared", left)]),
                    node("R", "1.0.0", &[("Shared", right)]),
                    node("Shared", "1.0.0", &[]),
                    node("Shared", "1.5.0", &[]),
                    node("Shared", "2.0.0", &[]),
                ]);
                match ConstraintResolver::new().resolve(&[identity("Root", "1.0.0")], &g) {
                    Ok(result) => assert_valid(&result),
                    Err(LoadError::ResolutionConflict { package, .. }) => {
                        assert_eq!(package, "Shared")
                    }
                    Err(other) => panic!("unexpected error {:?}", other),
                }
            }
        }
    }
}
