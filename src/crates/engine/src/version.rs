//! Monotonic patch-version arbitration.
//!
//! Grounded in the bump-then-clear-prerelease pattern used for crate version
//! bumps elsewhere in the corpus (`v.patch += 1; v.build = BuildMetadata::EMPTY`):
//! here the same discipline governs graph schema versions instead of crate
//! versions. Patch increments only — the engine never bumps major or minor.

use std::cmp::Ordering;

use semver::{BuildMetadata, Prerelease, Version};

/// The engine's initial graph version.
pub fn initial_version() -> Version {
    Version::new(1, 0, 0)
}

/// Generates and compares monotonic patch versions.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionArbiter;

impl VersionArbiter {
    pub fn new() -> Self {
        Self
    }

    /// The next patch version after `current`.
    pub fn next(&self, current: &Version) -> Version {
        let mut next = current.clone();
        next.patch += 1;
        next.pre = Prerelease::EMPTY;
        next.build = BuildMetadata::EMPTY;
        next
    }

    pub fn compare(&self, a: &Version, b: &Version) -> Ordering {
        a.cmp(b)
    }

    /// Parse a stored version string, falling back to the spec's tolerant
    /// scheme when the string isn't valid SemVer: split on `.`, parse the
    /// last numeric component, increment it, rejoin.
    pub fn parse(&self, raw: &str) -> Version {
        if let Ok(v) = Version::parse(raw) {
            return v;
        }
        Self::fallback_parse(raw)
    }

    fn fallback_parse(raw: &str) -> Version {
        let mut parts: Vec<&str> = raw.split('.').collect();
        if parts.is_empty() {
            return initial_version();
        }
        let digits: String = parts
            .last()
            .unwrap()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let last: u64 = digits.parse().unwrap_or(0);
        parts.pop();

        let mut nums: Vec<u64> = parts
            .iter()
            .map(|p| {
                p.chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect();
        nums.push(last);
        while nums.len() < 3 {
            nums.push(0);
        }
        Version::new(nums[0], nums[1], nums[2])
    }

    /// Apply the fallback scheme's "increment last numeric component" rule
    /// directly to an unparseable stored version string.
    pub fn next_from_str(&self, raw: &str) -> Version {
        let mut v = self.parse(raw);
        v.patch += 1;
        v
    }
}
