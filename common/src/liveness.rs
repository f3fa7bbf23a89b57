/// Tracks when the master was last heard from.
#[derive(Debug, Clone, Default)]
pub struct LivenessTracker {
    last_contact_ms: Option<u64>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_contact(&mut self, now_ms: u64) {
        self.last_contact_ms = Some(now_ms);
    }

    pub fn last_contact_ms(&self) -> Option<u64> {
        self.last_contact_ms
    }

    pub fn has_contact(&self) -> bool {
        self.last_contact_ms.is_some()
    }

    /// Stale once `ping_interval_ms + grace_ms` have elapsed, boundary
    /// included. A tracker that never saw the master is always stale.
    pub fn is_stale(&self, now_ms: u64, ping_interval_ms: u64, grace_ms: u64) -> bool {
        match self.last_contact_ms {
            Some(last) => {
                now_ms.saturating_sub(last) >= ping_interval_ms.saturating_add(grace_ms)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stale_before_first_contact() {
        let tracker = LivenessTracker::new();
        assert!(tracker.is_stale(0, 1_000, 2_000));
        assert!(tracker.is_stale(500, 1_000, 2_000));
        assert!(!tracker.has_contact());
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let mut tracker = LivenessTracker::new();
        tracker.record_contact(10_000);

        assert!(!tracker.is_stale(12_999, 1_000, 2_000));
        assert!(tracker.is_stale(13_000, 1_000, 2_000));
        assert!(tracker.is_stale(13_001, 1_000, 2_000));
    }

    #[test]
    fn clock_going_backwards_is_not_stale() {
        let mut tracker = LivenessTracker::new();
        tracker.record_contact(5_000);
        assert!(!tracker.is_stale(4_000, 1_000, 2_000));
    }

    #[test]
    fn contact_refreshes_liveness() {
        let mut tracker = LivenessTracker::new();
        tracker.record_contact(0);
        assert!(tracker.is_stale(3_001, 1_000, 2_000));

        tracker.record_contact(3_001);
        assert!(!tracker.is_stale(3_500, 1_000, 2_000));
        assert_eq!(tracker.last_contact_ms(), Some(3_001));
    }
}
