//! Installation traversal: download, framework match, dependency-first
//! extraction into memory.

mod archive;
mod module;

use std::collections::{HashMap, HashSet};

use futures_util::future::BoxFuture;
use glob::{MatchOptions, Pattern};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{LoadError, Result};
use crate::framework::TargetFramework;
use crate::package::{PackageId, PackageIdentity};
use crate::resolve::DependencyNode;
use crate::source::SourceRegistry;

pub use archive::{FrameworkGroup, PackageArchive};
pub use module::{ImageLoader, LoadedModule, ModuleFormat, ModuleLoader, classify};

#[cfg(test)]
pub use module::MockModuleLoader;

const MODULE_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// What one request has installed so far.
#[derive(Debug, Default)]
pub struct InstallState {
    installed: HashSet<PackageId>,
    in_progress: HashSet<PackageId>,
    packages: Vec<PackageIdentity>,
    modules: Vec<LoadedModule>,
}

impl InstallState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from names that are already resident and must not be loaded
    /// again.
    pub fn with_installed<I: IntoIterator<Item = PackageId>>(names: I) -> Self {
        Self {
            installed: names.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_installed(&self, id: &PackageId) -> bool {
        self.installed.contains(id)
    }

    /// Packages installed by this traversal, in install order.
    pub fn packages(&self) -> &[PackageIdentity] {
        &self.packages
    }

    /// Loaded modules, in extraction order.
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn into_parts(self) -> (Vec<PackageIdentity>, Vec<LoadedModule>) {
        (self.packages, self.modules)
    }
}

/// Installs resolved packages into memory.
pub struct Installer<'a> {
    registry: &'a SourceRegistry,
    loader: &'a dyn ModuleLoader,
    framework: &'a TargetFramework,
    pattern: &'a Pattern,
}

impl<'a> Installer<'a> {
    pub fn new(
        registry: &'a SourceRegistry,
        loader: &'a dyn ModuleLoader,
        framework: &'a TargetFramework,
        pattern: &'a Pattern,
    ) -> Self {
        Self {
            registry,
            loader,
            framework,
            pattern,
        }
    }

    /// Installs every node of `resolved`, each one's dependencies first.
    /// A package is committed to `state` only once all of its modules have
    /// loaded.
    #[tracing::instrument(skip(self, resolved, state, cancel))]
    pub async fn install(
        &self,
        resolved: &[DependencyNode],
        state: &mut InstallState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let by_name: HashMap<PackageId, &DependencyNode> = resolved
            .iter()
            .map(|node| (node.identity.id.clone(), node))
            .collect();

        for node in resolved {
            self.install_one(node, &by_name, state, cancel).await?;
        }

        info!(
            "Installed {} packages, {} modules",
            state.packages.len(),
            state.modules.len()
        );
        Ok(())
    }

    fn install_one<'s>(
        &'s self,
        node: &'s DependencyNode,
        by_name: &'s HashMap<PackageId, &'s DependencyNode>,
        state: &'s mut InstallState,
        cancel: &'s CancellationToken,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let identity = &node.identity;
            if state.installed.contains(&identity.id) {
                debug!("{} already installed, skipping", identity.id);
                return Ok(());
            }
            if !state.in_progress.insert(identity.id.clone()) {
                // Reached again through a cycle; the outer visit finishes it.
                return Ok(());
            }

            let source = self.registry.get(node.source).ok_or_else(|| {
                LoadError::Internal(format!("{} refers to unknown feed {}", identity, node.source))
            })?;
            debug!("Downloading {} from {}...", identity, source.name());
            let bytes = source.download(identity, cancel).await?;
            let mut archive = PackageArchive::open(identity, bytes)?;

            let items = archive
                .nearest_group(self.framework)
                .map(|group| {
                    debug!("Using {} assets of {}", group.framework, identity);
                    group.items.clone()
                })
                .ok_or_else(|| LoadError::UnsupportedArtifact(identity.clone()))?;

            for dependency in &node.dependencies {
                if let Some(dependency_node) = by_name.get(&dependency.id) {
                    self.install_one(dependency_node, by_name, state, cancel)
                        .await?;
                }
            }

            let mut modules = Vec::new();
            for item in items.iter().filter(|item| self.is_module(item)) {
                if cancel.is_cancelled() {
                    return Err(LoadError::Cancelled);
                }
                let image = archive.read(item)?;
                modules.push(self.loader.load(identity, item, image)?);
            }

            debug!("{}: {} modules", identity, modules.len());
            state.in_progress.remove(&identity.id);
            state.installed.insert(identity.id.clone());
            state.packages.push(identity.clone());
            state.modules.extend(modules);
            Ok(())
        })
    }

    fn is_module(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        self.pattern.matches_with(file_name, MODULE_MATCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageDependency, VersionRange};
    use crate::test_utils::{StaticSource, identity, nupkg, registry_of, simple_nupkg};
    use std::sync::Arc;

    fn node(id: &str, version: &str, deps: &[&str]) -> DependencyNode {
        DependencyNode {
            identity: identity(id, version),
            dependencies: deps
                .iter()
                .map(|d| PackageDependency::new(*d, VersionRange::all()))
                .collect(),
            source: 0,
        }
    }

    fn pattern() -> Pattern {
        Pattern::new("*.dll").unwrap()
    }

    async fn run(
        registry: &SourceRegistry,
        resolved: &[DependencyNode],
        state: &mut InstallState,
    ) -> Result<()> {
        let framework = TargetFramework::default();
        let pattern = pattern();
        let loader = ImageLoader::default();
        Installer::new(registry, &loader, &framework, &pattern)
            .install(resolved, state, &CancellationToken::new())
            .await
    }

    fn module_packages(state: &InstallState) -> Vec<String> {
        state
            .modules()
            .iter()
            .map(|m| m.package.id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_dependencies_load_before_dependents() {
        let source = StaticSource::new("feed")
            .archive("App", "1.0.0", simple_nupkg("App"))
            .archive("Lib", "1.0.0", simple_nupkg("Lib"))
            .archive("Core", "1.0.0", simple_nupkg("Core"));
        let registry = registry_of(vec![Arc::new(source)]);

        // Deliberately listed dependents first.
        let resolved = vec![
            node("App", "1.0.0", &["Lib", "Core"]),
            node("Lib", "1.0.0", &["Core"]),
            node("Core", "1.0.0", &[]),
        ];
        let mut state = InstallState::new();
        run(&registry, &resolved, &mut state).await.unwrap();

        assert_eq!(module_packages(&state), vec!["Core", "Lib", "App"]);
        let packages: Vec<String> = state.packages().iter().map(ToString::to_string).collect();
        assert_eq!(packages, vec!["Core 1.0.0", "Lib 1.0.0", "App 1.0.0"]);
    }

    #[tokio::test]
    async fn test_installed_names_are_skipped() {
        let source = Arc::new(
            StaticSource::new("feed")
                .archive("App", "1.0.0", simple_nupkg("App"))
                .archive("Core", "1.0.0", simple_nupkg("Core")),
        );
        let registry = registry_of(vec![source.clone()]);
        let resolved = vec![
            node("Core", "1.0.0", &[]),
            node("App", "1.0.0", &["Core"]),
            node("core", "1.0.0", &[]),
        ];

        let mut state = InstallState::with_installed([PackageId::new("CORE")]);
        run(&registry, &resolved, &mut state).await.unwrap();

        assert_eq!(module_packages(&state), vec!["App"]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_cycle_installs_each_package_once() {
        let source = StaticSource::new("feed")
            .archive("A", "1.0.0", simple_nupkg("A"))
            .archive("B", "1.0.0", simple_nupkg("B"));
        let registry = registry_of(vec![Arc::new(source)]);
        let resolved = vec![node("A", "1.0.0", &["B"]), node("B", "1.0.0", &["A"])];

        let mut state = InstallState::new();
        run(&registry, &resolved, &mut state).await.unwrap();
        assert_eq!(module_packages(&state), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_incompatible_package_is_unsupported() {
        let source = StaticSource::new("feed").archive(
            "Legacy",
            "1.0.0",
            nupkg(&[("lib/net48/Legacy.dll", b"x")]),
        );
        let registry = registry_of(vec![Arc::new(source)]);

        let mut state = InstallState::new();
        let err = run(&registry, &[node("Legacy", "1.0.0", &[])], &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedArtifact(ref id) if id == &identity("Legacy", "1.0.0")));
        assert!(state.modules().is_empty());
    }

    #[tokio::test]
    async fn test_only_matching_files_of_nearest_group_load() {
        let source = StaticSource::new("feed").archive(
            "Foo",
            "1.0.0",
            nupkg(&[
                ("lib/net461/Foo.dll", b"old"),
                ("lib/netstandard2.0/Foo.dll", b"ns"),
                ("lib/netstandard2.0/Foo.xml", b"docs"),
                ("lib/netstandard2.0/Foo.Extra.DLL", b"extra"),
            ]),
        );
        let registry = registry_of(vec![Arc::new(source)]);

        let mut state = InstallState::new();
        run(&registry, &[node("Foo", "1.0.0", &[])], &mut state)
            .await
            .unwrap();
        let paths: Vec<&str> = state.modules().iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["lib/netstandard2.0/Foo.dll", "lib/netstandard2.0/Foo.Extra.DLL"]
        );
    }

    #[tokio::test]
    async fn test_meta_package_installs_without_modules() {
        let source = StaticSource::new("feed")
            .archive("Meta", "1.0.0", nupkg(&[("Meta.nuspec", b"<package/>")]))
            .archive("Core", "1.0.0", simple_nupkg("Core"));
        let registry = registry_of(vec![Arc::new(source)]);

        let mut state = InstallState::new();
        run(
            &registry,
            &[node("Meta", "1.0.0", &["Core"]), node("Core", "1.0.0", &[])],
            &mut state,
        )
        .await
        .unwrap();
        assert_eq!(module_packages(&state), vec!["Core"]);
        assert_eq!(state.packages().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_package_is_not_partially_committed() {
        let source = StaticSource::new("feed")
            .archive("Core", "1.0.0", simple_nupkg("Core"))
            .archive(
                "App",
                "1.0.0",
                nupkg(&[
                    ("lib/net5.0/App.dll", b"ok"),
                    ("lib/net5.0/App.Broken.dll", b"bad"),
                ]),
            );
        let registry = registry_of(vec![Arc::new(source)]);

        let mut loader = MockModuleLoader::new();
        loader.expect_load().returning(|package, path, image| {
            if path.ends_with("Broken.dll") {
                Err(LoadError::InvalidModule {
                    package: package.clone(),
                    path: path.to_string(),
                    reason: "bad image".into(),
                })
            } else {
                Ok(LoadedModule::new(package.clone(), path, ModuleFormat::Managed, image))
            }
        });

        let framework = TargetFramework::default();
        let pattern = pattern();
        let mut state = InstallState::new();
        let err = Installer::new(&registry, &loader, &framework, &pattern)
            .install(
                &[node("App", "1.0.0", &["Core"]), node("Core", "1.0.0", &[])],
                &mut state,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::InvalidModule { .. }));
        assert_eq!(module_packages(&state), vec!["Core"]);
        assert!(!state.is_installed(&PackageId::new("App")));
    }

    #[tokio::test]
    async fn test_cancelled_install_commits_nothing() {
        let source = StaticSource::new("feed").archive("Foo", "1.0.0", simple_nupkg("Foo"));
        let registry = registry_of(vec![Arc::new(source)]);
        let framework = TargetFramework::default();
        let pattern = pattern();
        let loader = ImageLoader::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut state = InstallState::new();
        let err = Installer::new(&registry, &loader, &framework, &pattern)
            .install(&[node("Foo", "1.0.0", &[])], &mut state, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Cancelled));
        assert!(state.modules().is_empty());
        assert!(state.packages().is_empty());
    }
}
