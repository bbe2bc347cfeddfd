//! Loader configuration.
//!
//! Read from a JSON file when one is given or found in the user config
//! directory; everything has a default so an empty `{}` is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};
use crate::framework::TargetFramework;
use crate::http::{MAX_RETRIES, RETRY_DELAY_MS, RequestOptions};

/// Public feed used when nothing else is configured.
pub const DEFAULT_FEED_URL: &str = "https://api.nuget.org/v3/index.json";

const CONFIG_DIR_NAME: &str = "nuload";
const CONFIG_FILE_NAME: &str = "config.json";

/// One feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Service index URL.
    pub url: String,
    /// In-flight request cap for this feed; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<usize>,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_concurrent_requests: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Feeds in lookup priority order.
    pub feeds: Vec<FeedConfig>,
    pub target_framework: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_tries: usize,
    pub retry_delay_ms: u64,
    /// Glob matched against module file names inside a framework group.
    pub module_pattern: String,
    /// Reject images that are not managed PE images.
    pub require_managed_modules: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            feeds: vec![FeedConfig::new(DEFAULT_FEED_URL)],
            target_framework: "net5.0".to_string(),
            request_timeout_secs: 100,
            download_timeout_secs: 300,
            max_tries: MAX_RETRIES,
            retry_delay_ms: RETRY_DELAY_MS,
            module_pattern: "*.dll".to_string(),
            require_managed_modules: false,
        }
    }
}

impl LoaderConfig {
    /// `<config_dir>/nuload/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads `path` if given; otherwise the default path when that file
    /// exists; otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        Self::from_file(&path)
    }

    /// Reads and validates a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| LoadError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the configured feeds, keeping their order.
    pub fn with_sources<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let feeds: Vec<FeedConfig> = urls.into_iter().map(FeedConfig::new).collect();
        if !feeds.is_empty() {
            self.feeds = feeds;
        }
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.target_framework = framework.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(LoadError::Config("at least one feed is required".into()));
        }
        for feed in &self.feeds {
            if feed.url.trim().is_empty() {
                return Err(LoadError::Config("feed url must not be empty".into()));
            }
            if feed.max_concurrent_requests == Some(0) {
                return Err(LoadError::Config(format!(
                    "max_concurrent_requests for {} must be at least 1",
                    feed.url
                )));
            }
        }
        if self.max_tries == 0 {
            return Err(LoadError::Config("max_tries must be at least 1".into()));
        }
        self.module_matcher()?;
        self.framework()?;
        Ok(())
    }

    pub fn framework(&self) -> Result<TargetFramework> {
        TargetFramework::parse(&self.target_framework)
    }

    pub fn module_matcher(&self) -> Result<glob::Pattern> {
        glob::Pattern::new(&self.module_pattern).map_err(|e| {
            LoadError::Config(format!("Invalid module pattern '{}': {}", self.module_pattern, e))
        })
    }

    /// Transport options shared by every feed.
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            max_tries: self.max_tries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..Default::default()
        }
    }
}
