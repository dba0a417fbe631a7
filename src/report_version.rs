//! Monotone report version stamped on outgoing state messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-wide counter the master uses to order state snapshots.
///
/// Seeded from wall-clock seconds x 10 000 so values keep growing across
/// restarts. That only holds if the clock is monotone across restarts; a
/// clock stepped backwards can reissue older values after a restart.
/// Within one process the counter is strictly non-decreasing.
#[derive(Debug)]
pub struct ReportVersion(AtomicU64);

impl ReportVersion {
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(AtomicU64::new(seconds * 10_000))
    }

    /// Start from an explicit seed. Test hook.
    pub fn with_seed(seed: u64) -> Self {
        Self(AtomicU64::new(seed))
    }

    /// Bump after a state-mutating task completes (create/alter/push).
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ReportVersion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotone() {
        let version = ReportVersion::with_seed(100);
        assert_eq!(version.current(), 100);
        assert_eq!(version.bump(), 101);
        assert_eq!(version.bump(), 102);
        assert_eq!(version.current(), 102);
    }

    #[test]
    fn seeded_from_clock() {
        let version = ReportVersion::new();
        // Any realistic clock puts the seed far above zero.
        assert!(version.current() > 1_000_000);
    }
}
