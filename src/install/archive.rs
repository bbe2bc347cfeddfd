//! Package archives read from memory.

use std::io::{Cursor, Read};

use log::debug;
use zip::ZipArchive;

use crate::error::{LoadError, Result};
use crate::framework::{FrameworkReducer, TargetFramework};
use crate::package::PackageIdentity;

const LIB_FOLDER: &str = "lib/";
const EMPTY_FOLDER_MARKER: &str = "_._";
/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PRESIZE: usize = 16 * 1024 * 1024;

/// Files shipped for one framework under `lib/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkGroup {
    pub framework: TargetFramework,
    /// Archive paths, in archive order.
    pub items: Vec<String>,
}

/// A downloaded package archive, never written to disk.
pub struct PackageArchive {
    identity: PackageIdentity,
    zip: ZipArchive<Cursor<Vec<u8>>>,
    groups: Vec<FrameworkGroup>,
}

impl PackageArchive {
    pub fn open(identity: &PackageIdentity, bytes: Vec<u8>) -> Result<Self> {
        let zip = ZipArchive::new(Cursor::new(bytes)).map_err(|e| LoadError::InvalidArchive {
            package: identity.clone(),
            reason: e.to_string(),
        })?;
        let groups = lib_groups(zip.file_names());
        debug!(
            "{} ships lib groups: {}",
            identity,
            groups
                .iter()
                .map(|g| g.framework.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            identity: identity.clone(),
            zip,
            groups,
        })
    }

    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    pub fn groups(&self) -> &[FrameworkGroup] {
        &self.groups
    }

    /// Frameworks the archive ships libraries for.
    pub fn supported_frameworks(&self) -> Vec<&TargetFramework> {
        self.groups.iter().map(|g| &g.framework).collect()
    }

    /// The group nearest to `target`, or `None` when nothing is compatible.
    pub fn nearest_group(&self, target: &TargetFramework) -> Option<&FrameworkGroup> {
        let nearest = FrameworkReducer::new().get_nearest(target, self.supported_frameworks())?;
        self.groups.iter().find(|g| &g.framework == nearest)
    }

    /// Reads one entry fully.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let invalid = |reason: String| LoadError::InvalidArchive {
            package: self.identity.clone(),
            reason,
        };
        let mut entry = match self.zip.by_name(path) {
            Ok(entry) => entry,
            Err(e) => return Err(invalid(format!("{}: {}", path, e))),
        };
        let mut buffer = Vec::with_capacity(presize(entry.size()));
        if let Err(e) = entry.read_to_end(&mut buffer) {
            return Err(invalid(format!("{}: {}", path, e)));
        }
        Ok(buffer)
    }
}

/// Groups `lib/<tfm>/...` entries by framework. Files directly under
/// `lib/` belong to the framework-agnostic group; an archive without any
/// `lib/` entries supports any framework with no files.
fn lib_groups<'a>(names: impl Iterator<Item = &'a str>) -> Vec<FrameworkGroup> {
    let mut groups: Vec<FrameworkGroup> = Vec::new();
    let mut saw_lib = false;

    for name in names {
        let name = name.replace('\\', "/");
        let Some(rest) = strip_prefix_ignore_case(&name, LIB_FOLDER) else {
            continue;
        };
        saw_lib = true;
        if rest.is_empty() || rest.ends_with('/') {
            continue;
        }

        let (framework, file) = match rest.split_once('/') {
            Some((folder, file)) => match TargetFramework::parse(folder) {
                Ok(framework) => (framework, file),
                Err(e) => {
                    debug!("Skipping {}: {}", name, e);
                    continue;
                }
            },
            None => (TargetFramework::any(), rest),
        };

        let index = match groups.iter().position(|g| g.framework == framework) {
            Some(index) => index,
            None => {
                groups.push(FrameworkGroup {
                    framework,
                    items: Vec::new(),
                });
                groups.len() - 1
            }
        };

        let file_name = file.rsplit('/').next().unwrap_or(file);
        if file_name != EMPTY_FOLDER_MARKER {
            groups[index].items.push(name.clone());
        }
    }

    if !saw_lib {
        groups.push(FrameworkGroup {
            framework: TargetFramework::any(),
            items: Vec::new(),
        });
    }
    groups
}

/// Capacity to reserve for an entry declaring `size` bytes. The declared
/// size comes from the archive and is not trusted.
fn presize(size: u64) -> usize {
    usize::try_from(size).map_or(MAX_PRESIZE, |size| size.min(MAX_PRESIZE))
}

fn strip_prefix_ignore_case<'s>(s: &'s str, prefix: &str) -> Option<&'s str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}
