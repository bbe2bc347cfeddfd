//! Target frameworks (the consumer's runtime profile) and compatibility rules.
//!
//! Both short folder names (`net5.0`, `netstandard2.0`, `net461`) and full
//! names (`.NETStandard2.0`, `.NETFramework,Version=v4.6.1`) are accepted.

mod reducer;

use std::fmt;
use std::str::FromStr;

pub use reducer::FrameworkReducer;

use crate::error::LoadError;

/// Framework family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameworkFamily {
    /// `.NETCoreApp`, including `net5.0` and later.
    NetCoreApp,
    /// `.NETStandard`.
    NetStandard,
    /// `.NETFramework`.
    NetFramework,
    /// Framework-agnostic content.
    Any,
    /// A framework this crate does not model; only compatible with itself.
    Other(String),
}

/// A target framework such as `net5.0` or `netstandard2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetFramework {
    family: FrameworkFamily,
    version: (u32, u32, u32),
    platform: Option<String>,
}

impl TargetFramework {
    pub fn any() -> Self {
        Self {
            family: FrameworkFamily::Any,
            version: (0, 0, 0),
            platform: None,
        }
    }

    pub fn new(family: FrameworkFamily, major: u32, minor: u32) -> Self {
        Self {
            family,
            version: (major, minor, 0),
            platform: None,
        }
    }

    pub fn family(&self) -> &FrameworkFamily {
        &self.family
    }

    pub fn version(&self) -> (u32, u32, u32) {
        self.version
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn is_any(&self) -> bool {
        self.family == FrameworkFamily::Any
    }

    /// Parses a short folder name or a full framework name. Unknown names
    /// become [`FrameworkFamily::Other`].
    pub fn parse(input: &str) -> Result<Self, LoadError> {
        let raw = input.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("any") {
            return Ok(Self::any());
        }

        let lower = raw.to_ascii_lowercase();
        let (name, platform) = match lower.split_once('-') {
            Some((name, platform)) if !platform.is_empty() => (name, Some(platform.to_string())),
            _ => (lower.as_str(), None),
        };

        // Full names: ".NETStandard2.0" or ".NETStandard,Version=v2.0".
        let full = |prefix: &str, family: FrameworkFamily| -> Option<Result<Self, LoadError>> {
            let rest = name.strip_prefix(prefix)?;
            let rest = rest
                .strip_prefix(",version=v")
                .or_else(|| rest.strip_prefix(",version="))
                .unwrap_or(rest);
            Some(dotted_version(raw, rest).map(|version| Self {
                family,
                version,
                platform: platform.clone(),
            }))
        };
        if let Some(parsed) = full(".netcoreapp", FrameworkFamily::NetCoreApp)
            .or_else(|| full(".netstandard", FrameworkFamily::NetStandard))
            .or_else(|| full(".netframework", FrameworkFamily::NetFramework))
        {
            return parsed;
        }

        let short = |prefix: &str, family: FrameworkFamily| -> Option<Result<Self, LoadError>> {
            let rest = name.strip_prefix(prefix)?;
            if rest.is_empty() || !rest.as_bytes()[0].is_ascii_digit() {
                return None;
            }
            Some(short_version(raw, rest).map(|version| Self {
                family,
                version,
                platform: platform.clone(),
            }))
        };
        if let Some(parsed) = short("netcoreapp", FrameworkFamily::NetCoreApp)
            .or_else(|| short("netstandard", FrameworkFamily::NetStandard))
        {
            return parsed;
        }

        if let Some(rest) = name.strip_prefix("net")
            && !rest.is_empty()
            && rest.as_bytes()[0].is_ascii_digit()
        {
            let version = short_version(raw, rest)?;
            // net5.0 and later continue the .NETCoreApp line.
            let family = if version.0 >= 5 {
                FrameworkFamily::NetCoreApp
            } else {
                FrameworkFamily::NetFramework
            };
            return Ok(Self {
                family,
                version,
                platform,
            });
        }

        Ok(Self {
            family: FrameworkFamily::Other(lower.clone()),
            version: (0, 0, 0),
            platform: None,
        })
    }

    /// Whether assets built for `candidate` can be used by `self`.
    pub fn is_compatible_with(&self, candidate: &TargetFramework) -> bool {
        if candidate.is_any() {
            return true;
        }

        let platform_ok = match (&candidate.platform, &self.platform) {
            (None, _) => true,
            (Some(c), Some(t)) => c == t,
            (Some(_), None) => false,
        };
        if !platform_ok {
            return false;
        }

        if self.family == candidate.family {
            if let FrameworkFamily::Other(_) = self.family {
                return self == candidate;
            }
            return candidate.version <= self.version;
        }

        if candidate.family == FrameworkFamily::NetStandard {
            return self
                .max_netstandard()
                .is_some_and(|max| candidate.version <= max);
        }

        false
    }

    /// Highest `.NETStandard` version this framework implements.
    fn max_netstandard(&self) -> Option<(u32, u32, u32)> {
        match self.family {
            FrameworkFamily::NetCoreApp => match self.version {
                v if v >= (3, 0, 0) => Some((2, 1, 0)),
                v if v >= (2, 0, 0) => Some((2, 0, 0)),
                v if v >= (1, 0, 0) => Some((1, 6, 0)),
                _ => None,
            },
            FrameworkFamily::NetFramework => match self.version {
                v if v >= (4, 6, 1) => Some((2, 0, 0)),
                v if v >= (4, 6, 0) => Some((1, 3, 0)),
                v if v >= (4, 5, 1) => Some((1, 2, 0)),
                v if v >= (4, 5, 0) => Some((1, 1, 0)),
                _ => None,
            },
            FrameworkFamily::NetStandard => Some(self.version),
            _ => None,
        }
    }

    /// The short folder name (`net5.0`, `netstandard2.0`, `net461`).
    pub fn short_folder_name(&self) -> String {
        let (major, minor, patch) = self.version;
        let mut name = match &self.family {
            FrameworkFamily::Any => return "any".to_string(),
            FrameworkFamily::Other(name) => return name.clone(),
            FrameworkFamily::NetCoreApp if major >= 5 => format!("net{}.{}", major, minor),
            FrameworkFamily::NetCoreApp => format!("netcoreapp{}.{}", major, minor),
            FrameworkFamily::NetStandard => format!("netstandard{}.{}", major, minor),
            FrameworkFamily::NetFramework if patch > 0 => {
                format!("net{}{}{}", major, minor, patch)
            }
            FrameworkFamily::NetFramework => format!("net{}{}", major, minor),
        };
        if let Some(platform) = &self.platform {
            name.push('-');
            name.push_str(platform);
        }
        name
    }
}

fn framework_syntax(input: &str) -> LoadError {
    LoadError::Config(format!("Invalid target framework '{}'", input))
}

/// Parses `2.0`, `4.6.1`, `v3.1`.
fn dotted_version(input: &str, s: &str) -> Result<(u32, u32, u32), LoadError> {
    let s = s.strip_prefix('v').unwrap_or(s);
    let mut parts = [0u32; 3];
    let pieces: Vec<&str> = s.split('.').collect();
    if pieces.is_empty() || pieces.len() > 4 {
        return Err(framework_syntax(input));
    }
    for (slot, piece) in parts.iter_mut().zip(pieces.iter()) {
        *slot = piece.parse().map_err(|_| framework_syntax(input))?;
    }
    Ok((parts[0], parts[1], parts[2]))
}

/// Parses folder versions: `5.0`, `3.1`, or the dotless `461`, `48`.
fn short_version(input: &str, s: &str) -> Result<(u32, u32, u32), LoadError> {
    if s.contains('.') {
        return dotted_version(input, s);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) || s.len() > 3 {
        return Err(framework_syntax(input));
    }
    let digit = |i: usize| -> u32 {
        s.as_bytes()
            .get(i)
            .map(|b| u32::from(b - b'0'))
            .unwrap_or(0)
    };
    Ok((digit(0), digit(1), digit(2)))
}

impl fmt::Display for TargetFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_folder_name())
    }
}

impl FromStr for TargetFramework {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for TargetFramework {
    fn default() -> Self {
        Self::new(FrameworkFamily::NetCoreApp, 5, 0)
    }
}
