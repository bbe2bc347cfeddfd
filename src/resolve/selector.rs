use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{LoadError, Result};
use crate::package::{NuGetVersion, PackageIdentity, PackageRequest, VersionRange};
use crate::source::SourceRegistry;

/// Picks the single version of `request.id` to install.
///
/// Feeds are asked in priority order and the first feed with any usable
/// candidate decides; later feeds are not consulted.
#[tracing::instrument(skip(registry, cancel))]
pub async fn select_version(
    request: &PackageRequest,
    registry: &SourceRegistry,
    cancel: &CancellationToken,
) -> Result<PackageIdentity> {
    let range = request.parsed_range()?;

    for (_, source) in registry.iter() {
        let versions = source.find_versions(&request.id, cancel).await?;
        let candidate = pick_candidate(&versions, range.as_ref(), request.allow_prerelease);

        match candidate {
            Some(version) => {
                info!(
                    "Selected {} {} from {}",
                    request.id,
                    version,
                    source.name()
                );
                return Ok(PackageIdentity::new(request.id.clone(), version.clone()));
            }
            None => debug!("{} has no candidate for {}", source.name(), request.id),
        }
    }

    Err(LoadError::PackageNotFound {
        package: request.id.to_string(),
        requirement: range.map(|r| r.to_string()),
    })
}

/// With a range: best match among the versions allowed by the prerelease
/// flag. Without: the last version whose prerelease flag equals
/// `allow_prerelease` exactly.
fn pick_candidate<'a>(
    versions: &'a [NuGetVersion],
    range: Option<&VersionRange>,
    allow_prerelease: bool,
) -> Option<&'a NuGetVersion> {
    match range {
        Some(range) => range.find_best_match(
            versions
                .iter()
                .filter(|v| allow_prerelease || !v.is_prerelease()),
        ),
        None => versions
            .iter()
            .filter(|v| v.is_prerelease() == allow_prerelease)
            .max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockPackageSource;
    use crate::test_utils::{StaticSource, identity, registry_of};
    use std::sync::Arc;

    fn versions_source(name: &str, versions: &[&str]) -> MockPackageSource {
        let versions: Vec<NuGetVersion> = versions.iter().map(|v| v.parse().unwrap()).collect();
        let mut mock = MockPackageSource::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_find_versions()
            .times(1)
            .returning(move |_, _| Ok(versions.clone()));
        mock
    }

    #[tokio::test]
    async fn test_range_excludes_prerelease_and_upper_bound() {
        let registry = registry_of(vec![Arc::new(versions_source(
            "feed",
            &["1.0.0", "1.5.0", "2.0.0", "1.9.0-beta"],
        ))]);
        let request = PackageRequest::new("Foo").version("[1.0,2.0)");

        let selected = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, identity("Foo", "1.5.0"));
    }

    #[tokio::test]
    async fn test_range_with_prerelease_allowed() {
        let registry = registry_of(vec![Arc::new(versions_source(
            "feed",
            &["1.0.0", "1.5.0", "2.0.0", "1.9.0-beta"],
        ))]);
        let request = PackageRequest::new("Foo")
            .version("[1.0,2.0)")
            .prerelease(true);

        let selected = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, identity("Foo", "1.9.0-beta"));
    }

    #[tokio::test]
    async fn test_no_range_takes_last_stable() {
        let registry = registry_of(vec![Arc::new(versions_source(
            "feed",
            &["1.0.0", "2.0.0-rc", "2.0.0"],
        ))]);
        let request = PackageRequest::new("Bar");

        let selected = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, identity("Bar", "2.0.0"));
    }

    #[tokio::test]
    async fn test_no_range_prerelease_requires_prerelease() {
        let registry = registry_of(vec![Arc::new(versions_source(
            "feed",
            &["1.0.0", "2.0.0-rc", "2.0.0"],
        ))]);
        let request = PackageRequest::new("Bar").prerelease(true);

        let selected = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, identity("Bar", "2.0.0-rc"));
    }

    #[tokio::test]
    async fn test_first_feed_with_candidate_wins() {
        let mut first = MockPackageSource::new();
        first.expect_name().return_const("first".to_string());
        first
            .expect_find_versions()
            .times(1)
            .returning(|_, _| Ok(vec!["3.0.0-preview".parse().unwrap()]));

        let second = versions_source("second", &["1.0.0", "1.2.0"]);

        let mut third = MockPackageSource::new();
        third.expect_name().return_const("third".to_string());
        third.expect_find_versions().never();

        let registry = registry_of(vec![Arc::new(first), Arc::new(second), Arc::new(third)]);
        let selected = select_version(&PackageRequest::new("Foo"), &registry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selected, identity("Foo", "1.2.0"));
    }

    #[tokio::test]
    async fn test_not_found_after_every_feed() {
        let registry = registry_of(vec![
            Arc::new(StaticSource::new("a")),
            Arc::new(StaticSource::new("b").package("Foo", "0.5.0", &[])),
        ]);
        let request = PackageRequest::new("Foo").version("[1.0, )");

        let err = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::PackageNotFound { ref package, requirement: Some(_) } if package == "Foo"
        ));
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_network() {
        let source = Arc::new(StaticSource::new("feed").package("Foo", "1.0.0", &[]));
        let registry = registry_of(vec![source.clone()]);
        let request = PackageRequest::new("Foo").version("[1.0,");

        let err = select_version(&request, &registry, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ConstraintSyntax { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_pick_candidate_no_exact_prerelease_match() {
        let versions: Vec<NuGetVersion> = ["1.0.0", "2.0.0"].iter().map(|v| v.parse().unwrap()).collect();
        assert!(pick_candidate(&versions, None, true).is_none());
    }
}
