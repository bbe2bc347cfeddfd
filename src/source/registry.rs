//! Ordered registry of package feeds.
//!
//! Registration order is lookup priority: callers walk the feeds front to
//! back and stop at the first one that answers.

use std::sync::Arc;

use super::{NuGetFeed, PackageSource};
use crate::config::LoaderConfig;

/// Ordered list of feeds.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn PackageSource>>,
}

impl SourceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one NuGet feed per configured entry, in configuration order.
    pub fn from_config(config: &LoaderConfig) -> Self {
        let options = config.request_options();
        let mut registry = Self::new();
        for feed in &config.feeds {
            registry.register(Arc::new(NuGetFeed::new(
                &feed.url,
                feed.max_concurrent_requests,
                options.clone(),
            )));
        }
        registry
    }

    /// Append a feed with the lowest priority so far.
    pub fn register(&mut self, source: Arc<dyn PackageSource>) {
        self.sources.push(source);
    }

    /// Get a feed by its priority index.
    pub fn get(&self, index: usize) -> Option<&Arc<dyn PackageSource>> {
        self.sources.get(index)
    }

    /// Feeds in priority order, with their index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn PackageSource>)> {
        self.sources.iter().enumerate()
    }

    /// Get the number of registered feeds.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no feeds are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Feed names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
