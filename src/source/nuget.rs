//! NuGet v3 feed implementation.

use async_trait::async_trait;
use log::debug;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{PackageSource, SourceDependencyInfo};
use crate::error::{LoadError, Result};
use crate::framework::{FrameworkReducer, TargetFramework};
use crate::http::{RequestOptions, ThrottledClient};
use crate::package::{NuGetVersion, PackageDependency, PackageId, PackageIdentity, VersionRange};

const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress/3.0.0";
const REGISTRATIONS_BASE_URL: &str = "RegistrationsBaseUrl";

/// Registration hive types, most preferred first. The first three include
/// SemVer 2.0 packages (gzip-encoded on nuget.org); the rest only SemVer 1.
const REGISTRATION_TYPES: &[&str] = &[
    "RegistrationsBaseUrl/3.6.0",
    "RegistrationsBaseUrl/Versioned",
    "RegistrationsBaseUrl/3.4.0",
    "RegistrationsBaseUrl",
    "RegistrationsBaseUrl/3.0.0-rc",
    "RegistrationsBaseUrl/3.0.0-beta",
];

/// NuGet v3 API response types (internal).
mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct ServiceIndex {
        #[serde(default)]
        pub resources: Vec<Resource>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Resource {
        #[serde(rename = "@id")]
        pub id: String,
        #[serde(rename = "@type")]
        pub kind: ResourceType,
    }

    #[derive(Deserialize, Debug)]
    #[serde(untagged)]
    pub enum ResourceType {
        One(String),
        Many(Vec<String>),
    }

    impl ResourceType {
        pub fn names(&self) -> Vec<&str> {
            match self {
                ResourceType::One(name) => vec![name.as_str()],
                ResourceType::Many(names) => names.iter().map(String::as_str).collect(),
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct VersionList {
        #[serde(default)]
        pub versions: Vec<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RegistrationIndex {
        #[serde(default)]
        pub items: Vec<RegistrationPage>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RegistrationPage {
        #[serde(rename = "@id")]
        pub id: String,
        pub lower: Option<String>,
        pub upper: Option<String>,
        pub items: Option<Vec<RegistrationLeaf>>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RegistrationLeaf {
        #[serde(rename = "catalogEntry")]
        pub catalog_entry: CatalogEntry,
    }

    #[derive(Deserialize, Debug)]
    pub struct CatalogEntry {
        pub version: String,
        #[serde(rename = "dependencyGroups", default)]
        pub dependency_groups: Vec<DependencyGroup>,
    }

    #[derive(Deserialize, Debug)]
    pub struct DependencyGroup {
        #[serde(rename = "targetFramework")]
        pub target_framework: Option<String>,
        #[serde(default)]
        pub dependencies: Vec<Dependency>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Dependency {
        pub id: String,
        pub range: Option<String>,
    }
}

/// Endpoints discovered from the service index.
#[derive(Debug, Clone)]
struct FeedResources {
    package_base: String,
    registrations: Option<String>,
}

/// A NuGet v3 feed reached through its service index URL.
pub struct NuGetFeed {
    index_url: String,
    client: ThrottledClient,
    options: RequestOptions,
    resources: OnceCell<FeedResources>,
}

impl NuGetFeed {
    /// Create a feed for `index_url`, allowing at most `max_concurrent`
    /// requests in flight (`None` = unlimited).
    pub fn new(index_url: &str, max_concurrent: Option<usize>, options: RequestOptions) -> Self {
        Self::from_client(index_url, ThrottledClient::new(max_concurrent), options)
    }

    /// Create from an existing ThrottledClient.
    pub fn from_client(index_url: &str, client: ThrottledClient, options: RequestOptions) -> Self {
        Self {
            index_url: index_url.to_string(),
            client,
            options,
            resources: OnceCell::new(),
        }
    }

    pub fn client(&self) -> &ThrottledClient {
        &self.client
    }

    async fn resources(&self, cancel: &CancellationToken) -> Result<&FeedResources> {
        self.resources
            .get_or_try_init(|| self.fetch_resources(cancel))
            .await
    }

    async fn fetch_resources(&self, cancel: &CancellationToken) -> Result<FeedResources> {
        debug!("Fetching service index from {}...", self.index_url);
        let index: api::ServiceIndex = self
            .client
            .get_json(&self.index_url, &self.options, cancel)
            .await
            .map_err(LoadError::from_transport)?
            .ok_or_else(|| LoadError::Config(format!("{} has no service index", self.index_url)))?;

        let find = |pred: &dyn Fn(&str) -> bool| {
            index
                .resources
                .iter()
                .find(|r| r.kind.names().into_iter().any(pred))
                .map(|r| r.id.trim_end_matches('/').to_string())
        };

        let package_base = find(&|name| name == PACKAGE_BASE_ADDRESS).ok_or_else(|| {
            LoadError::Config(format!(
                "{} does not advertise {}",
                self.index_url, PACKAGE_BASE_ADDRESS
            ))
        })?;

        let registrations = REGISTRATION_TYPES
            .iter()
            .find_map(|kind| find(&|name| name == *kind))
            .or_else(|| find(&|name| name.starts_with(REGISTRATIONS_BASE_URL)));

        debug!(
            "Feed {}: package base {}, registrations {:?}",
            self.index_url, package_base, registrations
        );
        Ok(FeedResources {
            package_base,
            registrations,
        })
    }

    async fn find_catalog_entry(
        &self,
        registrations: &str,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Option<api::CatalogEntry>> {
        let url = format!("{}/{}/index.json", registrations, identity.id.to_lowercase());
        let options = self.options.clone().ignore_not_found(true);

        let Some(index) = self
            .client
            .get_json::<api::RegistrationIndex>(&url, &options, cancel)
            .await
            .map_err(LoadError::from_transport)?
        else {
            return Ok(None);
        };

        for page in index.items {
            if !page_may_contain(&page, &identity.version) {
                continue;
            }
            let leaves = match page.items {
                Some(leaves) => leaves,
                None => {
                    debug!("Fetching registration page {}...", page.id);
                    let fetched: Option<api::RegistrationPage> = self
                        .client
                        .get_json(&page.id, &options, cancel)
                        .await
                        .map_err(LoadError::from_transport)?;
                    fetched.and_then(|p| p.items).unwrap_or_default()
                }
            };

            let found = leaves.into_iter().find(|leaf| {
                NuGetVersion::parse(&leaf.catalog_entry.version)
                    .is_ok_and(|v| v == identity.version)
            });
            if let Some(leaf) = found {
                return Ok(Some(leaf.catalog_entry));
            }
        }

        Ok(None)
    }
}

/// Pages advertise the version span they cover; skip the ones that can't
/// hold `version`. Unparseable bounds are treated as open.
fn page_may_contain(page: &api::RegistrationPage, version: &NuGetVersion) -> bool {
    let parse = |bound: &Option<String>| bound.as_deref().and_then(|b| NuGetVersion::parse(b).ok());
    let above_lower = parse(&page.lower).is_none_or(|lower| *version >= lower);
    let below_upper = parse(&page.upper).is_none_or(|upper| *version <= upper);
    above_lower && below_upper
}

/// Picks the dependency group nearest to `framework`. Groups without a
/// framework apply to any target. Dependencies with an unparseable range
/// are skipped.
fn nearest_group_dependencies(
    groups: Vec<api::DependencyGroup>,
    framework: &TargetFramework,
) -> Vec<PackageDependency> {
    let mut parsed = Vec::with_capacity(groups.len());
    for group in groups {
        let tfm = match group.target_framework.as_deref() {
            None => TargetFramework::any(),
            Some(name) => match TargetFramework::parse(name) {
                Ok(tfm) => tfm,
                Err(e) => {
                    debug!("Skipping dependency group '{}': {}", name, e);
                    continue;
                }
            },
        };
        parsed.push((tfm, group.dependencies));
    }

    let frameworks: Vec<TargetFramework> = parsed.iter().map(|(tfm, _)| tfm.clone()).collect();
    let Some(nearest) = FrameworkReducer::new().get_nearest(framework, &frameworks) else {
        return Vec::new();
    };

    let Some((_, dependencies)) = parsed.into_iter().find(|(tfm, _)| tfm == nearest) else {
        return Vec::new();
    };

    dependencies
        .into_iter()
        .filter_map(|dep| {
            let range = match dep.range.as_deref().map(str::trim) {
                None | Some("") => VersionRange::all(),
                Some(range) => match VersionRange::parse(range) {
                    Ok(range) => range,
                    Err(e) => {
                        debug!("Skipping dependency {}: {}", dep.id, e);
                        return None;
                    }
                },
            };
            Some(PackageDependency::new(dep.id, range))
        })
        .collect()
}

#[async_trait]
impl PackageSource for NuGetFeed {
    fn name(&self) -> &str {
        &self.index_url
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn find_versions(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Result<Vec<NuGetVersion>> {
        let resources = self.resources(cancel).await?;
        let url = format!("{}/{}/index.json", resources.package_base, id.to_lowercase());
        let options = self.options.clone().ignore_not_found(true);

        let Some(list) = self
            .client
            .get_json::<api::VersionList>(&url, &options, cancel)
            .await
            .map_err(LoadError::from_transport)?
        else {
            debug!("{} not found on {}", id, self.index_url);
            return Ok(Vec::new());
        };

        let mut versions: Vec<NuGetVersion> = list
            .versions
            .iter()
            .filter_map(|v| match NuGetVersion::parse(v) {
                Ok(version) => Some(version),
                Err(e) => {
                    debug!("Skipping version '{}' of {}: {}", v, id, e);
                    None
                }
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn get_dependencies(
        &self,
        identity: &PackageIdentity,
        framework: &TargetFramework,
        cancel: &CancellationToken,
    ) -> Result<Option<SourceDependencyInfo>> {
        let resources = self.resources(cancel).await?;
        let Some(registrations) = resources.registrations.as_deref() else {
            debug!("{} has no registration resource", self.index_url);
            return Ok(None);
        };

        let Some(entry) = self.find_catalog_entry(registrations, identity, cancel).await? else {
            return Ok(None);
        };

        let dependencies = nearest_group_dependencies(entry.dependency_groups, framework);
        Ok(Some(SourceDependencyInfo::new(identity.clone(), dependencies)))
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn download(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let resources = self.resources(cancel).await?;
        let id = identity.id.to_lowercase();
        let version = identity.version.to_normalized_string().to_lowercase();
        let url = format!(
            "{}/{}/{}/{}.{}.nupkg",
            resources.package_base, id, version, id, version
        );

        debug!("Downloading {} from {}...", identity, url);
        let response = self
            .client
            .get(&url, &self.options, cancel)
            .await
            .map_err(LoadError::from_transport)?
            .found()
            .ok_or_else(|| LoadError::PackageNotFound {
                package: identity.to_string(),
                requirement: None,
            })?;

        response
            .bytes(cancel)
            .await
            .map_err(LoadError::from_transport)
    }
}
