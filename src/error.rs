//! Error taxonomy for the resolve/select/install pipeline.

use std::fmt;

use crate::package::PackageIdentity;

/// Result type used by every public pipeline operation.
pub type Result<T, E = LoadError> = std::result::Result<T, E>;

/// One unsatisfiable requirement recorded by the constraint resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingRange {
    /// The package declaring the requirement; `None` for a version pinned
    /// by the caller (a requested root or a package loaded earlier).
    pub dependent: Option<PackageIdentity>,
    /// The declared range, in its original notation.
    pub range: String,
}

impl fmt::Display for ConflictingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dependent {
            Some(dependent) => write!(f, "{} requires {}", dependent, self.range),
            None => write!(f, "pinned to {}", self.range),
        }
    }
}

fn join_ranges(ranges: &[ConflictingRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced to the caller of a load request.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No feed produced a matching version for a requested or transitively needed package.
    #[error("Cannot find package {package}{}", .requirement.as_ref().map(|r| format!(" ({})", r)).unwrap_or_default())]
    PackageNotFound {
        package: String,
        requirement: Option<String>,
    },

    /// A version or version range string failed to parse.
    #[error("Invalid version range '{input}': {reason}")]
    ConstraintSyntax { input: String, reason: String },

    /// No assignment of versions satisfies every declared range.
    #[error("Unable to resolve a version of {package} satisfying: {}", join_ranges(.ranges))]
    ResolutionConflict {
        package: String,
        ranges: Vec<ConflictingRange>,
    },

    /// A resolved package has no binary variant usable by the target framework.
    #[error("Package {0} has no assets compatible with the target framework")]
    UnsupportedArtifact(PackageIdentity),

    /// The package name was already installed in this session.
    #[error("Package {0} is already installed")]
    AlreadyInstalled(String),

    /// Network failure after retries were exhausted.
    #[error("Transport failure: {0:#}")]
    Transport(#[source] anyhow::Error),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A downloaded archive could not be read.
    #[error("Invalid package archive for {package}: {reason}")]
    InvalidArchive {
        package: PackageIdentity,
        reason: String,
    },

    /// The module loader rejected an image.
    #[error("Cannot load module {path} from {package}: {reason}")]
    InvalidModule {
        package: PackageIdentity,
        path: String,
        reason: String,
    },

    /// Configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoadError {
    /// Converts a transport-level error, keeping cancellation distinguishable.
    pub fn from_transport(error: anyhow::Error) -> Self {
        if error.downcast_ref::<Cancelled>().is_some() {
            LoadError::Cancelled
        } else {
            LoadError::Transport(error)
        }
    }
}

/// Marker carried through `anyhow` chains when a cancellation signal fired.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}
