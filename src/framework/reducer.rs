use log::debug;

use super::{FrameworkFamily, TargetFramework};

/// Picks the nearest compatible framework out of the ones a package offers.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameworkReducer;

impl FrameworkReducer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the candidate closest to `target`: same family with the
    /// highest version not above it, then the highest compatible
    /// `.NETStandard`, then framework-agnostic content. `None` when nothing
    /// is compatible.
    pub fn get_nearest<'a, I>(&self, target: &TargetFramework, candidates: I) -> Option<&'a TargetFramework>
    where
        I: IntoIterator<Item = &'a TargetFramework>,
    {
        let nearest = candidates
            .into_iter()
            .filter(|candidate| target.is_compatible_with(candidate))
            .max_by(|a, b| Self::rank(target, a).cmp(&Self::rank(target, b)));

        debug!(
            "Nearest framework for {}: {}",
            target,
            nearest.map(ToString::to_string).unwrap_or_else(|| "none".into())
        );
        nearest
    }

    /// Sort key; higher is nearer.
    fn rank(target: &TargetFramework, candidate: &TargetFramework) -> (u8, (u32, u32, u32), bool) {
        let tier = if candidate.family() == target.family() {
            3
        } else if candidate.family() == &FrameworkFamily::NetStandard {
            2
        } else if candidate.is_any() {
            1
        } else {
            0
        };
        // Platform-specific assets beat generic ones of the same version.
        (tier, candidate.version(), candidate.platform().is_some())
    }
}
