//! Load sessions: the end-to-end pipeline from a request to loaded modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::{ConflictingRange, LoadError, Result};
use crate::framework::TargetFramework;
use crate::host::HostPackages;
use crate::install::{ImageLoader, InstallState, Installer, LoadedModule, ModuleLoader};
use crate::package::{PackageId, PackageIdentity, PackageRequest};
use crate::resolve::{
    ConstraintResolver, DependencyGraph, DependencyNode, GraphBuilder, select_version,
};
use crate::source::SourceRegistry;

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The root package at the version actually installed.
    pub root: PackageIdentity,
    /// Every package installed by this request, dependencies first.
    pub packages: Vec<PackageIdentity>,
    /// Loaded modules, dependencies first.
    pub modules: Vec<LoadedModule>,
}

/// Owns everything one consumer needs to load packages, plus the packages
/// loaded so far. Sessions share nothing with each other.
pub struct LoaderSession {
    registry: SourceRegistry,
    host: HostPackages,
    framework: TargetFramework,
    pattern: glob::Pattern,
    loader: Arc<dyn ModuleLoader>,
    installed: Mutex<HashMap<PackageId, PackageIdentity>>,
}

impl LoaderSession {
    /// Session over the configured feeds with the bundled host table.
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: SourceRegistry::from_config(config),
            host: HostPackages::default(),
            framework: config.framework()?,
            pattern: config.module_matcher()?,
            loader: Arc::new(ImageLoader::new(config.require_managed_modules)),
            installed: Mutex::new(HashMap::new()),
        })
    }

    /// Session over an explicit registry, e.g. custom feeds.
    pub fn with_registry(registry: SourceRegistry, framework: TargetFramework) -> Self {
        Self {
            registry,
            host: HostPackages::default(),
            framework,
            pattern: default_pattern(),
            loader: Arc::new(ImageLoader::default()),
            installed: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the host exclusion table.
    pub fn host_packages(mut self, host: HostPackages) -> Self {
        self.host = host;
        self
    }

    pub fn framework(&self) -> &TargetFramework {
        &self.framework
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Whether a package name was installed by an earlier load.
    pub fn is_installed(&self, id: &PackageId) -> Result<bool> {
        Ok(self.installed_packages()?.contains_key(id))
    }

    fn installed_packages(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<PackageId, PackageIdentity>>> {
        self.installed
            .lock()
            .map_err(|_| LoadError::Internal("session state poisoned".into()))
    }

    /// Select, expand, resolve and install `request`.
    ///
    /// Fails with [`LoadError::AlreadyInstalled`] without touching the
    /// network when the name was loaded before in this session. Packages
    /// loaded earlier keep their version; a dependency range that excludes
    /// it is a [`LoadError::ResolutionConflict`]. Nothing is recorded unless
    /// the whole request succeeds.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn load(
        &self,
        request: &PackageRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        if self.is_installed(&request.id)? {
            return Err(LoadError::AlreadyInstalled(request.id.to_string()));
        }

        let (root, resolved) = self.resolve_nodes(request, cancel).await?;

        let mut state = InstallState::with_installed(self.installed_packages()?.keys().cloned());
        Installer::new(&self.registry, self.loader.as_ref(), &self.framework, &self.pattern)
            .install(&resolved, &mut state, cancel)
            .await?;
        let (packages, modules) = state.into_parts();

        {
            let mut installed = self.installed_packages()?;
            // A concurrent load may have won the race for the same root, or
            // loaded a shared dependency at another version.
            if installed.contains_key(&root.id) {
                return Err(LoadError::AlreadyInstalled(root.id.to_string()));
            }
            if let Some((package, resident)) = packages.iter().find_map(|p| {
                installed
                    .get(&p.id)
                    .filter(|resident| resident.version != p.version)
                    .map(|resident| (p, resident))
            }) {
                return Err(LoadError::ResolutionConflict {
                    package: package.id.to_string(),
                    ranges: vec![ConflictingRange {
                        dependent: None,
                        range: format!("[{}]", resident.version),
                    }],
                });
            }
            installed.insert(root.id.clone(), root.clone());
            installed.extend(packages.iter().map(|p| (p.id.clone(), p.clone())));
        }

        info!(
            "Loaded {} with {} modules from {} packages",
            root,
            modules.len(),
            packages.len()
        );
        Ok(LoadOutcome {
            root,
            packages,
            modules,
        })
    }

    /// Select, expand and resolve `request` without downloading archives.
    /// Returns the install set, dependencies first, including packages from
    /// earlier loads that it depends on.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn resolve_only(
        &self,
        request: &PackageRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageIdentity>> {
        let (_, resolved) = self.resolve_nodes(request, cancel).await?;
        Ok(resolved.into_iter().map(|node| node.identity).collect())
    }

    async fn resolve_nodes(
        &self,
        request: &PackageRequest,
        cancel: &CancellationToken,
    ) -> Result<(PackageIdentity, Vec<DependencyNode>)> {
        let resident: Vec<PackageIdentity> = self.installed_packages()?.values().cloned().collect();
        let root = select_version(request, &self.registry, cancel).await?;

        let mut graph = DependencyGraph::new();
        GraphBuilder::new(&self.registry, &self.host, &self.framework)
            .expand(&root, &mut graph, cancel)
            .await?;

        let resolved = ConstraintResolver::new()
            .resident(resident)
            .resolve(std::slice::from_ref(&root), &graph)?;
        Ok((root, resolved))
    }
}

fn default_pattern() -> glob::Pattern {
    glob::Pattern::new("*.dll").unwrap_or_default()
}
