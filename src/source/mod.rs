//! Source abstraction for package feeds.
//!
//! A feed answers three questions about packages: which versions exist,
//! what a given build depends on, and what its archive bytes are.

mod nuget;
mod registry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::framework::TargetFramework;
use crate::package::{NuGetVersion, PackageDependency, PackageId, PackageIdentity};

pub use nuget::NuGetFeed;
pub use registry::SourceRegistry;

/// Dependency metadata one feed reports for one exact identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDependencyInfo {
    pub identity: PackageIdentity,
    /// Dependencies of the group nearest to the requested framework.
    pub dependencies: Vec<PackageDependency>,
}

impl SourceDependencyInfo {
    pub fn new(identity: PackageIdentity, dependencies: Vec<PackageDependency>) -> Self {
        Self {
            identity,
            dependencies,
        }
    }
}

/// Trait for package feeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Display name, usually the feed URL.
    fn name(&self) -> &str;

    /// All versions the feed lists for `id`, ascending. Unknown ids yield
    /// an empty list.
    async fn find_versions(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Result<Vec<NuGetVersion>>;

    /// Dependency metadata for exactly `identity`, or `None` when the feed
    /// does not know it.
    async fn get_dependencies(
        &self,
        identity: &PackageIdentity,
        framework: &TargetFramework,
        cancel: &CancellationToken,
    ) -> Result<Option<SourceDependencyInfo>>;

    /// The package archive, fully in memory.
    async fn download(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;
}
