//! Dependency graph expansion.
//!
//! Nodes live in an arena indexed by identity; expansion walks an explicit
//! worklist so deep or cyclic graphs never grow the call stack.

use std::collections::HashMap;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::framework::TargetFramework;
use crate::host::HostPackages;
use crate::package::{NuGetVersion, PackageDependency, PackageId, PackageIdentity, VersionRange};
use crate::source::SourceRegistry;

/// One candidate package build and its (host-filtered) dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub identity: PackageIdentity,
    pub dependencies: Vec<PackageDependency>,
    /// Index of the feed the node was discovered from.
    pub source: usize,
}

/// Append-only set of nodes keyed by identity. The same id may appear at
/// several versions.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<PackageIdentity, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.index.contains_key(identity)
    }

    pub fn get(&self, identity: &PackageIdentity) -> Option<&DependencyNode> {
        self.index.get(identity).map(|&i| &self.nodes[i])
    }

    /// Inserts `node` unless its identity is already present. Returns
    /// whether it was inserted.
    pub fn insert(&mut self, node: DependencyNode) -> bool {
        if self.contains(&node.identity) {
            return false;
        }
        self.index.insert(node.identity.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter()
    }

    /// Every node of `id`, lowest version first.
    pub fn versions_of(&self, id: &PackageId) -> Vec<&DependencyNode> {
        let mut nodes: Vec<&DependencyNode> =
            self.nodes.iter().filter(|n| &n.identity.id == id).collect();
        nodes.sort_by(|a, b| a.identity.version.cmp(&b.identity.version));
        nodes
    }
}

/// Expands roots into the graph of reachable candidate nodes.
pub struct GraphBuilder<'a> {
    registry: &'a SourceRegistry,
    host: &'a HostPackages,
    framework: &'a TargetFramework,
    versions: HashMap<PackageId, Vec<NuGetVersion>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        registry: &'a SourceRegistry,
        host: &'a HostPackages,
        framework: &'a TargetFramework,
    ) -> Self {
        Self {
            registry,
            host,
            framework,
            versions: HashMap::new(),
        }
    }

    /// Adds `root` and everything reachable from it to `graph`.
    ///
    /// Identities already in the graph are not fetched again. For each
    /// identity the first feed that knows it provides its dependencies;
    /// identities no feed knows are left out. Host-provided dependencies
    /// are dropped from every node.
    #[tracing::instrument(skip(self, graph, cancel))]
    pub async fn expand(
        &mut self,
        root: &PackageIdentity,
        graph: &mut DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut worklist = vec![root.clone()];

        while let Some(identity) = worklist.pop() {
            if graph.contains(&identity) {
                continue;
            }

            let Some(node) = self.fetch_node(&identity, cancel).await? else {
                debug!("No feed has metadata for {}, skipping", identity);
                continue;
            };

            for dependency in &node.dependencies {
                if let Some(next) = self.floor_identity(dependency, cancel).await?
                    && !graph.contains(&next)
                {
                    worklist.push(next);
                }
            }

            graph.insert(node);
        }

        debug!("Graph for {} has {} nodes", root, graph.len());
        Ok(())
    }

    async fn fetch_node(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Option<DependencyNode>> {
        for (index, source) in self.registry.iter() {
            let Some(info) = source
                .get_dependencies(identity, self.framework, cancel)
                .await?
            else {
                continue;
            };

            let dependencies = info
                .dependencies
                .into_iter()
                .filter(|dep| {
                    let provided = self.host.is_provided_by_host(&dep.id);
                    if provided {
                        debug!("{} depends on {}, provided by host", identity, dep.id);
                    }
                    !provided
                })
                .collect();

            return Ok(Some(DependencyNode {
                identity: identity.clone(),
                dependencies,
                source: index,
            }));
        }
        Ok(None)
    }

    /// The identity to expand for a dependency edge: the range's inclusive
    /// floor, or the lowest listed version inside the range when the floor
    /// is open or missing.
    async fn floor_identity(
        &mut self,
        dependency: &PackageDependency,
        cancel: &CancellationToken,
    ) -> Result<Option<PackageIdentity>> {
        let range = &dependency.range;
        if let Some(min) = range.min_version()
            && range.is_min_inclusive()
        {
            return Ok(Some(PackageIdentity::new(dependency.id.clone(), min.clone())));
        }

        let versions = self.listed_versions(&dependency.id, cancel).await?;
        let lowest = lowest_satisfying(versions, range);
        if lowest.is_none() {
            debug!("No listed version of {} satisfies {}", dependency.id, range);
        }
        Ok(lowest.map(|v| PackageIdentity::new(dependency.id.clone(), v.clone())))
    }

    /// Versions of `id` from the first feed that lists any, cached per build.
    async fn listed_versions(
        &mut self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Result<&[NuGetVersion]> {
        if !self.versions.contains_key(id) {
            let mut listed = Vec::new();
            for (_, source) in self.registry.iter() {
                listed = source.find_versions(id, cancel).await?;
                if !listed.is_empty() {
                    break;
                }
            }
            self.versions.insert(id.clone(), listed);
        }
        Ok(self.versions.get(id).map(Vec::as_slice).unwrap_or_default())
    }
}

fn lowest_satisfying<'v>(versions: &'v [NuGetVersion], range: &VersionRange) -> Option<&'v NuGetVersion> {
    versions
        .iter()
        .filter(|v| range.includes_prerelease() || !v.is_prerelease())
        .filter(|v| range.satisfies(v))
        .min()
}
