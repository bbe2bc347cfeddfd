//! In-memory module images.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{LoadError, Result};
use crate::package::PackageIdentity;

/// Binary format of a module image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    /// PE image carrying a CLI header.
    Managed,
    /// PE image without a CLI header.
    NativePe,
    Elf,
    MachO,
    Unknown,
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleFormat::Managed => "managed",
            ModuleFormat::NativePe => "pe",
            ModuleFormat::Elf => "elf",
            ModuleFormat::MachO => "mach-o",
            ModuleFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Detect the binary format of `image` with goblin.
pub fn classify(image: &[u8]) -> ModuleFormat {
    match goblin::Object::parse(image) {
        Ok(goblin::Object::PE(pe)) => {
            let managed = pe
                .header
                .optional_header
                .is_some_and(|h| h.data_directories.get_clr_runtime_header().is_some());
            if managed {
                ModuleFormat::Managed
            } else {
                ModuleFormat::NativePe
            }
        }
        Ok(goblin::Object::Elf(_)) => ModuleFormat::Elf,
        Ok(goblin::Object::Mach(_)) => ModuleFormat::MachO,
        _ => ModuleFormat::Unknown,
    }
}

/// A module read from a package archive and held in memory.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub package: PackageIdentity,
    /// Path of the module inside the archive.
    pub path: String,
    pub size: usize,
    pub format: ModuleFormat,
    image: Arc<[u8]>,
}

impl LoadedModule {
    pub fn new(package: PackageIdentity, path: &str, format: ModuleFormat, image: Vec<u8>) -> Self {
        Self {
            package,
            path: path.to_string(),
            size: image.len(),
            format,
            image: image.into(),
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Shared handle to the image bytes.
    pub fn image_handle(&self) -> Arc<[u8]> {
        Arc::clone(&self.image)
    }

    /// File name part of `path`.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} bytes, {})",
            self.package, self.path, self.size, self.format
        )
    }
}

/// Turns module bytes into a loaded module.
#[cfg_attr(test, mockall::automock)]
pub trait ModuleLoader: Send + Sync {
    fn load(&self, package: &PackageIdentity, path: &str, image: Vec<u8>) -> Result<LoadedModule>;
}

/// Default loader: keeps the image and records its format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageLoader {
    require_managed: bool,
}

impl ImageLoader {
    pub fn new(require_managed: bool) -> Self {
        Self { require_managed }
    }
}

impl ModuleLoader for ImageLoader {
    fn load(&self, package: &PackageIdentity, path: &str, image: Vec<u8>) -> Result<LoadedModule> {
        let format = classify(&image);
        debug!("Loaded {} from {} ({})", path, package, format);

        if self.require_managed && format != ModuleFormat::Managed {
            return Err(LoadError::InvalidModule {
                package: package.clone(),
                path: path.to_string(),
                reason: format!("expected a managed image, found {}", format),
            });
        }

        Ok(LoadedModule::new(package.clone(), path, format, image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::identity;

    #[test]
    fn test_classify_unknown_bytes() {
        assert_eq!(classify(b"not a binary"), ModuleFormat::Unknown);
        assert_eq!(classify(&[]), ModuleFormat::Unknown);
    }

    #[test]
    fn test_classify_native_executable() {
        // The test binary itself is a native image for the host platform.
        let image = std::fs::read(std::env::current_exe().unwrap()).unwrap();
        let format = classify(&image);
        assert_ne!(format, ModuleFormat::Unknown);
        assert_ne!(format, ModuleFormat::Managed);
    }

    #[test]
    fn test_lenient_loader_keeps_any_image() {
        let module = ImageLoader::new(false)
            .load(&identity("Foo", "1.0.0"), "lib/net5.0/Foo.dll", b"payload".to_vec())
            .unwrap();
        assert_eq!(module.size, 7);
        assert_eq!(module.image(), b"payload");
        assert_eq!(module.file_name(), "Foo.dll");
        assert_eq!(module.format, ModuleFormat::Unknown);
        assert_eq!(
            module.to_string(),
            "Foo 1.0.0 lib/net5.0/Foo.dll (7 bytes, unknown)"
        );
    }

    #[test]
    fn test_strict_loader_rejects_unmanaged_image() {
        let err = ImageLoader::new(true)
            .load(&identity("Foo", "1.0.0"), "lib/net5.0/Foo.dll", b"payload".to_vec())
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidModule { ref path, .. } if path == "lib/net5.0/Foo.dll"));
    }
}
