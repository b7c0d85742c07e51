//! Capability policies and the 64-bit mask that carries them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named optional capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyFlag {
    /// No bits; always reported as set
    Default,
    BackgroundFrames,
    Images,
    OptimizeHmd,
    AllowPauseResume,
    RawImages,
    TrackedQuads,
}

impl PolicyFlag {
    /// Every flag that maps to a bit
    pub const NAMED: [PolicyFlag; 6] = [
        PolicyFlag::BackgroundFrames,
        PolicyFlag::Images,
        PolicyFlag::OptimizeHmd,
        PolicyFlag::AllowPauseResume,
        PolicyFlag::RawImages,
        PolicyFlag::TrackedQuads,
    ];

    pub const fn bits(self) -> u64 {
        match self {
            Self::Default => 0,
            Self::BackgroundFrames => 1 << 0,
            Self::Images => 1 << 1,
            Self::OptimizeHmd => 1 << 2,
            Self::AllowPauseResume => 1 << 3,
            Self::RawImages => 1 << 4,
            Self::TrackedQuads => 1 << 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::BackgroundFrames => "background_frames",
            Self::Images => "images",
            Self::OptimizeHmd => "optimize_hmd",
            Self::AllowPauseResume => "allow_pause_resume",
            Self::RawImages => "raw_images",
            Self::TrackedQuads => "tracked_quads",
        }
    }
}

/// Capability bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyMask(pub u64);

impl PolicyMask {
    pub const EMPTY: PolicyMask = PolicyMask(0);

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True when every bit of `flag` is set (`Default` is always contained)
    pub const fn contains(self, flag: PolicyFlag) -> bool {
        self.0 & flag.bits() == flag.bits()
    }

    #[must_use]
    pub const fn with(self, flag: PolicyFlag) -> Self {
        Self(self.0 | flag.bits())
    }

    #[must_use]
    pub const fn without(self, flag: PolicyFlag) -> Self {
        Self(self.0 & !flag.bits())
    }

    #[must_use]
    pub const fn complement(self) -> Self {
        Self(!self.0)
    }

    #[must_use]
    pub const fn intersect(self, other: PolicyMask) -> Self {
        Self(self.0 & other.0)
    }

    /// Named flags present in this mask
    pub fn flags(self) -> impl Iterator<Item = PolicyFlag> {
        PolicyFlag::NAMED
            .into_iter()
            .filter(move |flag| self.contains(*flag))
    }
}

impl FromIterator<PolicyFlag> for PolicyMask {
    fn from_iter<I: IntoIterator<Item = PolicyFlag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |mask, flag| mask.with(flag))
    }
}

impl fmt::Display for PolicyMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.flags().map(PolicyFlag::as_str).collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}
