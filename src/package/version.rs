//! NuGet package versions.
//!
//! Versions have one to four numeric parts (`major.minor[.patch[.revision]]`),
//! an optional prerelease label list (`-beta.1`) and optional build metadata
//! (`+sha`). Build metadata never takes part in equality or ordering.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::LoadError;

/// A parsed package version.
#[derive(Debug, Clone)]
pub struct NuGetVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release_labels: Vec<String>,
    metadata: Option<String>,
}

impl NuGetVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            release_labels: Vec::new(),
            metadata: None,
        }
    }

    /// Parses a version string, returning `ConstraintSyntax` on failure.
    pub fn parse(input: &str) -> Result<Self, LoadError> {
        let syntax = |reason: &str| LoadError::ConstraintSyntax {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(syntax("empty version"));
        }

        let (rest, metadata) = match trimmed.split_once('+') {
            Some((rest, meta)) if !meta.is_empty() => (rest, Some(meta.to_string())),
            Some(_) => return Err(syntax("empty build metadata")),
            None => (trimmed, None),
        };

        let (numbers, release_labels) = match rest.split_once('-') {
            Some((numbers, labels)) => {
                let labels: Vec<String> = labels.split('.').map(str::to_string).collect();
                if labels.iter().any(|l| !is_valid_label(l)) {
                    return Err(syntax("invalid prerelease label"));
                }
                (numbers, labels)
            }
            None => (rest, Vec::new()),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(syntax("expected 1 to 4 numeric parts"));
        }

        let mut values = [0u64; 4];
        for (slot, part) in values.iter_mut().zip(parts.iter()) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(syntax("version parts must be numeric"));
            }
            *slot = part
                .parse()
                .map_err(|_| syntax("version part out of range"))?;
        }

        Ok(Self {
            major: values[0],
            minor: values[1],
            patch: values[2],
            revision: values[3],
            release_labels,
            metadata,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn release_labels(&self) -> &[String] {
        &self.release_labels
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// Whether this is a prerelease build.
    pub fn is_prerelease(&self) -> bool {
        !self.release_labels.is_empty()
    }

    /// The normalized string form (`1.0.0`, `1.0.0.4`, `2.0.0-rc.1`).
    pub fn to_normalized_string(&self) -> String {
        let mut s = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.revision > 0 {
            s.push_str(&format!(".{}", self.revision));
        }
        if self.is_prerelease() {
            s.push('-');
            s.push_str(&self.release_labels.join("."));
        }
        s
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn compare_labels(a: &[String], b: &[String]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        // A release sorts above any prerelease of the same numbers.
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }

    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.to_lowercase().cmp(&y.to_lowercase()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.len().cmp(&b.len())
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| compare_labels(&self.release_labels, &other.release_labels))
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NuGetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NuGetVersion {}

impl Hash for NuGetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch, self.revision).hash(state);
        for label in &self.release_labels {
            match label.parse::<u64>() {
                Ok(n) => n.to_string().hash(state),
                Err(_) => label.to_lowercase().hash(state),
            }
        }
    }
}

impl fmt::Display for NuGetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())
    }
}

impl FromStr for NuGetVersion {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
