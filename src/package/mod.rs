//! Package identities, requests and dependency declarations.

mod range;
mod version;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

pub use range::VersionRange;
pub use version::NuGetVersion;

use crate::error::LoadError;

/// A package id. Ids compare case-insensitively and display as given.
#[derive(Debug, Clone)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used in feed URLs and lookups.
    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .to_ascii_lowercase()
            .cmp(&other.0.to_ascii_lowercase())
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One concrete package build: `(id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity {
    pub id: PackageId,
    pub version: NuGetVersion,
}

impl PackageIdentity {
    pub fn new(id: impl Into<PackageId>, version: NuGetVersion) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Builds an identity from an id and a version string.
    pub fn parse(id: &str, version: &str) -> Result<Self, LoadError> {
        Ok(Self::new(id, NuGetVersion::parse(version)?))
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// A declared dependency edge: `id` within `range`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageDependency {
    pub id: PackageId,
    pub range: VersionRange,
}

impl PackageDependency {
    pub fn new(id: impl Into<PackageId>, range: VersionRange) -> Self {
        Self {
            id: id.into(),
            range,
        }
    }
}

impl fmt::Display for PackageDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.range)
    }
}

/// What the caller asks for: a package name, an optional range and
/// whether prerelease builds are acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub id: PackageId,
    pub version_range: Option<String>,
    pub allow_prerelease: bool,
}

impl PackageRequest {
    /// Request the latest stable version of `id`.
    pub fn new(id: impl Into<PackageId>) -> Self {
        Self {
            id: id.into(),
            version_range: None,
            allow_prerelease: false,
        }
    }

    /// Constrain the request to a version range string.
    pub fn version(mut self, range: impl Into<String>) -> Self {
        self.version_range = Some(range.into());
        self
    }

    /// Allow prerelease versions.
    pub fn prerelease(mut self, allow: bool) -> Self {
        self.allow_prerelease = allow;
        self
    }

    /// Parses the version range, if any.
    pub fn parsed_range(&self) -> Result<Option<VersionRange>, LoadError> {
        self.version_range
            .as_deref()
            .map(VersionRange::parse)
            .transpose()
    }
}
