/// Monotonic change counter mirrored by GPU-side caches.
///
/// A cache entry holding version `v` is stale whenever the tracker reports a
/// version greater than `v`. New trackers start at 1 so a freshly created
/// cache entry (version 0) always uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 1 }
    }

    /// Marks as modified, increments version by 1
    pub fn changed(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Gets the current version number
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// `true` if a consumer that last saw `seen` must refresh.
    #[inline]
    #[must_use]
    pub fn is_newer_than(&self, seen: u64) -> bool {
        self.version > seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_ahead_of_fresh_consumers() {
        let t = ChangeTracker::new();
        assert!(t.is_newer_than(0));
        assert!(!t.is_newer_than(t.version()));
    }

    #[test]
    fn changed_bumps_version() {
        let mut t = ChangeTracker::new();
        let v = t.version();
        t.changed();
        assert_eq!(t.version(), v + 1);
        assert!(t.is_newer_than(v));
    }
}
