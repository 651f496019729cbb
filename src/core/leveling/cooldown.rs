// Per-member XP cooldown tracking.
//
// Presence in the set is the entire state: a (user, guild) pair that is in
// the map is suppressed from gaining XP, and nothing else is recorded. The
// set is process-local on purpose - losing it on restart at worst allows one
// early gain, it can never corrupt stored totals.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long a member is suppressed after gaining XP.
pub const COOLDOWN_WINDOW: Duration = Duration::from_secs(60);

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct MemberKey {
    user_id: u64,
    guild_id: u64,
}

/// Tracks which (user, guild) pairs are currently barred from gaining XP.
///
/// DashMap gives us an atomic insert-if-absent per key, which is the only
/// mutual exclusion the message path needs: two messages from the same
/// member arriving in parallel race on the insert and exactly one wins.
pub struct CooldownTracker {
    suppressed: DashMap<MemberKey, ()>,
    window: Duration,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            suppressed: DashMap::new(),
            window,
        }
    }

    /// Mark the pair as suppressed. Returns `false` (and changes nothing)
    /// if it already was.
    pub fn try_acquire(&self, user_id: u64, guild_id: u64) -> bool {
        self.suppressed
            .insert(MemberKey { user_id, guild_id }, ())
            .is_none()
    }

    /// Clear the suppression immediately.
    pub fn release(&self, user_id: u64, guild_id: u64) {
        self.suppressed.remove(&MemberKey { user_id, guild_id });
    }

    /// Spawn a fire-and-forget timer that releases the pair once the window
    /// elapses. The task lives independently of whatever message triggered
    /// it, so handler throughput is never tied to the number of outstanding
    /// cooldowns.
    pub fn schedule_release(self: &Arc<Self>, user_id: u64, guild_id: u64) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(tracker.window).await;
            tracker.release(user_id, guild_id);
        });
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(COOLDOWN_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_acquire_is_denied_until_release() {
        let tracker = CooldownTracker::default();

        assert!(tracker.try_acquire(1, 2));
        assert!(!tracker.try_acquire(1, 2));

        // A different member is unaffected.
        assert!(tracker.try_acquire(3, 2));

        tracker.release(1, 2);
        assert!(tracker.try_acquire(1, 2));
    }

    #[test]
    fn concurrent_acquire_has_exactly_one_winner() {
        let tracker = CooldownTracker::default();
        let wins = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    if tracker.try_acquire(7, 9) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_release_fires_after_the_window() {
        let tracker = Arc::new(CooldownTracker::default());

        assert!(tracker.try_acquire(1, 2));
        tracker.schedule_release(1, 2);

        // Halfway through the window the pair is still suppressed.
        tokio::time::sleep(COOLDOWN_WINDOW / 2).await;
        assert!(!tracker.try_acquire(1, 2));

        // Past the window the release task has fired.
        tokio::time::sleep(COOLDOWN_WINDOW).await;
        assert!(tracker.try_acquire(1, 2));
    }
}
