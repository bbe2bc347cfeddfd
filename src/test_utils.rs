//! In-memory feed and archive builders shared by unit tests.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use crate::error::{LoadError, Result};
use crate::framework::TargetFramework;
use crate::package::{NuGetVersion, PackageDependency, PackageId, PackageIdentity, VersionRange};
use crate::source::{PackageSource, SourceDependencyInfo, SourceRegistry};

/// A feed backed by a map. Every trait call is counted.
#[derive(Default)]
pub struct StaticSource {
    name: String,
    packages: HashMap<PackageIdentity, Vec<PackageDependency>>,
    archives: HashMap<PackageIdentity, Vec<u8>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Publish `id version` with `(dependency id, range)` edges.
    pub fn package(mut self, id: &str, version: &str, dependencies: &[(&str, &str)]) -> Self {
        let dependencies = dependencies
            .iter()
            .map(|(dep, range)| PackageDependency::new(*dep, VersionRange::parse(range).unwrap()))
            .collect();
        self.packages.insert(identity(id, version), dependencies);
        self
    }

    /// Serve `bytes` as the archive of `id version`.
    pub fn archive(mut self, id: &str, version: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(identity(id, version), bytes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self, cancel: &CancellationToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl PackageSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_versions(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Result<Vec<NuGetVersion>> {
        self.hit(cancel)?;
        let mut versions: Vec<NuGetVersion> = self
            .packages
            .keys()
            .filter(|identity| &identity.id == id)
            .map(|identity| identity.version.clone())
            .collect();
        versions.sort();
        Ok(versions)
    }

    async fn get_dependencies(
        &self,
        identity: &PackageIdentity,
        _framework: &TargetFramework,
        cancel: &CancellationToken,
    ) -> Result<Option<SourceDependencyInfo>> {
        self.hit(cancel)?;
        Ok(self
            .packages
            .get(identity)
            .map(|deps| SourceDependencyInfo::new(identity.clone(), deps.clone())))
    }

    async fn download(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.hit(cancel)?;
        self.archives
            .get(identity)
            .cloned()
            .ok_or_else(|| LoadError::PackageNotFound {
                package: identity.to_string(),
                requirement: None,
            })
    }
}

pub fn identity(id: &str, version: &str) -> PackageIdentity {
    PackageIdentity::parse(id, version).unwrap()
}

pub fn registry_of(sources: Vec<Arc<dyn PackageSource>>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    registry
}

/// Builds a zip archive holding `entries` of `(path, content)`.
pub fn nupkg(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (path, content) in entries {
        writer.start_file(*path, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// An archive with one `lib/net5.0/<id>.dll` module whose content is the id.
pub fn simple_nupkg(id: &str) -> Vec<u8> {
    let path = format!("lib/net5.0/{}.dll", id);
    nupkg(&[(path.as_str(), id.as_bytes())])
}
