//! Resolve, select and install NuGet packages at run time, keeping every
//! downloaded archive and module image in memory.

pub mod config;
pub mod error;
pub mod framework;
pub mod host;
pub mod http;
pub mod install;
pub mod package;
pub mod resolve;
pub mod session;
pub mod source;

/// Fixtures shared by the unit tests: in-memory feeds and archives.
#[cfg(test)]
pub mod test_utils;

pub use error::{LoadError, Result};
pub use session::{LoadOutcome, LoaderSession};
