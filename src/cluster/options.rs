//! Probe selection for discovery passes

use std::fmt;
use std::ops::BitOr;

/// Set of probes a discovery pass performs
///
/// Combine with `|`:
/// ```ignore
/// let opts = DiscoveryOptions::ROLE | DiscoveryOptions::SLAVE_READ_ONLY;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DiscoveryOptions(u8);

impl DiscoveryOptions {
    /// No probes at all
    pub const NONE: Self = Self(0);
    /// ROLE
    pub const ROLE: Self = Self(1);
    /// CONFIG GET save
    pub const SAVE_CONFIG: Self = Self(1 << 1);
    /// CONFIG GET slave-read-only
    pub const SLAVE_READ_ONLY: Self = Self(1 << 2);
    /// Sentinel-assisted discovery stops after the master
    pub const ONLY_MASTER: Self = Self(1 << 3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DiscoveryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Display for DiscoveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::ROLE, "role"),
            (Self::SAVE_CONFIG, "save-config"),
            (Self::SLAVE_READ_ONLY, "slave-read-only"),
            (Self::ONLY_MASTER, "only-master"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}
