//! Version ranges in NuGet interval notation.
//!
//! | Notation      | Meaning            |
//! |---------------|--------------------|
//! | `1.0`         | `1.0 <= x`         |
//! | `[1.0]`       | `x == 1.0`         |
//! | `(1.0,)`      | `1.0 < x`          |
//! | `(,1.0]`      | `x <= 1.0`         |
//! | `[1.0,2.0)`   | `1.0 <= x < 2.0`   |

use std::fmt;
use std::str::FromStr;

use super::NuGetVersion;
use crate::error::LoadError;

/// A constraint over package versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    min: Option<NuGetVersion>,
    min_inclusive: bool,
    max: Option<NuGetVersion>,
    max_inclusive: bool,
}

impl VersionRange {
    /// Range matching every version.
    pub fn all() -> Self {
        Self {
            min: None,
            min_inclusive: false,
            max: None,
            max_inclusive: false,
        }
    }

    /// Range matching `version` and anything above it.
    pub fn at_least(version: NuGetVersion) -> Self {
        Self {
            min: Some(version),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    /// Range matching exactly `version`.
    pub fn exact(version: NuGetVersion) -> Self {
        Self {
            min: Some(version.clone()),
            min_inclusive: true,
            max: Some(version),
            max_inclusive: true,
        }
    }

    pub fn parse(input: &str) -> Result<Self, LoadError> {
        let syntax = |reason: &str| LoadError::ConstraintSyntax {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let s = input.trim();
        if s.is_empty() {
            return Err(syntax("empty range"));
        }

        let first = s.as_bytes()[0];
        if first != b'[' && first != b'(' {
            // Plain version: inclusive minimum.
            return Ok(Self::at_least(NuGetVersion::parse(s)?));
        }

        let min_inclusive = first == b'[';
        let max_inclusive = match s.as_bytes()[s.len() - 1] {
            b']' => true,
            b')' => false,
            _ => return Err(syntax("missing closing bracket")),
        };
        if s.len() < 3 {
            return Err(syntax("empty interval"));
        }
        let inner = &s[1..s.len() - 1];

        let range = match inner.split_once(',') {
            None => {
                if !(min_inclusive && max_inclusive) {
                    return Err(syntax("exact versions must use [x]"));
                }
                let version = NuGetVersion::parse(inner)?;
                Self::exact(version)
            }
            Some((lo, hi)) => {
                if hi.contains(',') {
                    return Err(syntax("too many bounds"));
                }
                let parse_bound = |part: &str| -> Result<Option<NuGetVersion>, LoadError> {
                    let part = part.trim();
                    if part.is_empty() {
                        Ok(None)
                    } else {
                        NuGetVersion::parse(part).map(Some)
                    }
                };
                let min = parse_bound(lo)?;
                let max = parse_bound(hi)?;
                if min.is_none() && max.is_none() {
                    return Err(syntax("at least one bound is required"));
                }
                // An unbounded side is never inclusive.
                let range = Self {
                    min_inclusive: min_inclusive && min.is_some(),
                    max_inclusive: max_inclusive && max.is_some(),
                    min,
                    max,
                };
                if let (Some(lo), Some(hi)) = (&range.min, &range.max) {
                    if lo > hi {
                        return Err(syntax("minimum is greater than maximum"));
                    }
                    if lo == hi && !(range.min_inclusive && range.max_inclusive) {
                        return Err(syntax("interval is empty"));
                    }
                }
                range
            }
        };

        Ok(range)
    }

    pub fn min_version(&self) -> Option<&NuGetVersion> {
        self.min.as_ref()
    }

    pub fn max_version(&self) -> Option<&NuGetVersion> {
        self.max.as_ref()
    }

    pub fn is_min_inclusive(&self) -> bool {
        self.min_inclusive
    }

    /// Whether prerelease versions are implicitly in scope, i.e. a bound
    /// itself names a prerelease.
    pub fn includes_prerelease(&self) -> bool {
        self.min.as_ref().is_some_and(NuGetVersion::is_prerelease)
            || self.max.as_ref().is_some_and(NuGetVersion::is_prerelease)
    }

    pub fn satisfies(&self, version: &NuGetVersion) -> bool {
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }

    /// The highest version in `versions` satisfying this range. Among equal
    /// versions the first one seen is kept.
    pub fn find_best_match<'a, I>(&self, versions: I) -> Option<&'a NuGetVersion>
    where
        I: IntoIterator<Item = &'a NuGetVersion>,
    {
        versions
            .into_iter()
            .filter(|v| self.satisfies(v))
            .fold(None, |best: Option<&NuGetVersion>, candidate| match best {
                Some(current) if current >= candidate => Some(current),
                _ => Some(candidate),
            })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) if min == max && self.min_inclusive && self.max_inclusive => {
                write!(f, "[{}]", min)
            }
            _ => {
                write!(f, "{}", if self.min_inclusive { '[' } else { '(' })?;
                if let Some(min) = &self.min {
                    write!(f, "{}", min)?;
                }
                write!(f, ", ")?;
                if let Some(max) = &self.max {
                    write!(f, "{}", max)?;
                }
                write!(f, "{}", if self.max_inclusive { ']' } else { ')' })
            }
        }
    }
}

impl FromStr for VersionRange {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
