//! Packages already provided by the hosting runtime.
//!
//! Dependencies on these ids are pruned from the dependency graph: the host
//! has the assemblies loaded and a second copy would clash with them.

use std::collections::HashSet;

use crate::package::PackageId;

/// Label of the bundled set in [`DEFAULT_HOST_PACKAGES`]. Bump it whenever
/// the table is refreshed for a newer host runtime.
pub const DEFAULT_HOST_PACKAGES_LABEL: &str = "netcoreapp3.1-sdk-3.1.201";

/// Package ids bundled with the host runtime (the .NET SDK 3.1.201 package
/// conflict overrides).
pub const DEFAULT_HOST_PACKAGES: &[&str] = &[
    "Microsoft.CSharp",
    "Microsoft.Win32.Primitives",
    "Microsoft.Win32.Registry",
    "runtime.debian.8-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.fedora.23-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.fedora.24-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.opensuse.13.2-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.opensuse.42.1-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.osx.10.10-x64.runtime.native.System.Security.Cryptography.Apple",
    "runtime.osx.10.10-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.rhel.7-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.ubuntu.14.04-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.ubuntu.16.04-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "runtime.ubuntu.16.10-x64.runtime.native.System.Security.Cryptography.OpenSsl",
    "System.AppContext",
    "System.Buffers",
    "System.Collections",
    "System.Collections.Concurrent",
    "System.Collections.Immutable",
    "System.Collections.NonGeneric",
    "System.Collections.Specialized",
    "System.ComponentModel",
    "System.ComponentModel.EventBasedAsync",
    "System.ComponentModel.Primitives",
    "System.ComponentModel.TypeConverter",
    "System.Console",
    "System.Data.Common",
    "System.Diagnostics.Contracts",
    "System.Diagnostics.Debug",
    "System.Diagnostics.DiagnosticSource",
    "System.Diagnostics.FileVersionInfo",
    "System.Diagnostics.Process",
    "System.Diagnostics.StackTrace",
    "System.Diagnostics.TextWriterTraceListener",
    "System.Diagnostics.Tools",
    "System.Diagnostics.TraceSource",
    "System.Diagnostics.Tracing",
    "System.Dynamic.Runtime",
    "System.Globalization",
    "System.Globalization.Calendars",
    "System.Globalization.Extensions",
    "System.IO",
    "System.IO.Compression",
    "System.IO.Compression.ZipFile",
    "System.IO.FileSystem",
    "System.IO.FileSystem.AccessControl",
    "System.IO.FileSystem.DriveInfo",
    "System.IO.FileSystem.Primitives",
    "System.IO.FileSystem.Watcher",
    "System.IO.IsolatedStorage",
    "System.IO.MemoryMappedFiles",
    "System.IO.Pipes",
    "System.IO.UnmanagedMemoryStream",
    "System.Linq",
    "System.Linq.Expressions",
    "System.Linq.Queryable",
    "System.Net.Http",
    "System.Net.NameResolution",
    "System.Net.Primitives",
    "System.Net.Requests",
    "System.Net.Security",
    "System.Net.Sockets",
    "System.Net.WebHeaderCollection",
    "System.ObjectModel",
    "System.Private.DataContractSerialization",
    "System.Reflection",
    "System.Reflection.Emit",
    "System.Reflection.Emit.ILGeneration",
    "System.Reflection.Emit.Lightweight",
    "System.Reflection.Extensions",
    "System.Reflection.Metadata",
    "System.Reflection.Primitives",
    "System.Reflection.TypeExtensions",
    "System.Resources.ResourceManager",
    "System.Runtime",
    "System.Runtime.Extensions",
    "System.Runtime.Handles",
    "System.Runtime.InteropServices",
    "System.Runtime.InteropServices.RuntimeInformation",
    "System.Runtime.Loader",
    "System.Runtime.Numerics",
    "System.Runtime.Serialization.Formatters",
    "System.Runtime.Serialization.Json",
    "System.Runtime.Serialization.Primitives",
    "System.Security.AccessControl",
    "System.Security.Claims",
    "System.Security.Cryptography.Algorithms",
    "System.Security.Cryptography.Cng",
    "System.Security.Cryptography.Csp",
    "System.Security.Cryptography.Encoding",
    "System.Security.Cryptography.OpenSsl",
    "System.Security.Cryptography.Primitives",
    "System.Security.Cryptography.X509Certificates",
    "System.Security.Cryptography.Xml",
    "System.Security.Principal",
    "System.Security.Principal.Windows",
    "System.Text.Encoding",
    "System.Text.Encoding.Extensions",
    "System.Text.RegularExpressions",
    "System.Threading",
    "System.Threading.Overlapped",
    "System.Threading.Tasks",
    "System.Threading.Tasks.Extensions",
    "System.Threading.Tasks.Parallel",
    "System.Threading.Thread",
    "System.Threading.ThreadPool",
    "System.Threading.Timer",
    "System.ValueTuple",
    "System.Xml.ReaderWriter",
    "System.Xml.XDocument",
    "System.Xml.XmlDocument",
    "System.Xml.XmlSerializer",
    "System.Xml.XPath",
    "System.Xml.XPath.XDocument",
];

/// Name-only filter over the set of host-provided package ids.
///
/// The check ignores the version range a dependent declares, so a dependent
/// that needs a newer version than the host ships still gets the host copy.
#[derive(Debug, Clone)]
pub struct HostPackages {
    label: String,
    ids: HashSet<PackageId>,
}

impl HostPackages {
    /// Build a table from an explicit id list.
    pub fn new<I, S>(label: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PackageId>,
    {
        Self {
            label: label.into(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// A table that excludes nothing.
    pub fn none() -> Self {
        Self::new("none", Vec::<PackageId>::new())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id` is supplied by the host and must not be installed.
    pub fn is_provided_by_host(&self, id: &PackageId) -> bool {
        self.ids.contains(id)
    }
}

impl Default for HostPackages {
    fn default() -> Self {
        Self::new(
            DEFAULT_HOST_PACKAGES_LABEL,
            DEFAULT_HOST_PACKAGES.iter().copied(),
        )
    }
}
