// This is the leveling module - it contains ALL the business logic for the
// XP ledger. Notice how this module has NO Discord-specific code (no serenity,
// no poise imports). It works with primitive types (u64) so it could be reused
// behind a web app, CLI tool, or any other frontend.

#[path = "cooldown.rs"]
pub mod cooldown;

use async_trait::async_trait;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;

use self::cooldown::CooldownTracker;

/// How many leaderboard entries fit on one page.
pub const PAGE_SIZE: u64 = 10;

/// XP awarded per qualifying message is drawn uniformly from this range.
pub const MESSAGE_GAIN_RANGE: RangeInclusive<u64> = 15..=25;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A member's XP ledger entry for one guild.
///
/// **Why separate user_id and guild_id?**
/// Users can be in multiple Discord servers (guilds), and XP is tracked
/// independently in each one.
///
/// Invariant: `level` is always `level_for_xp(xp)`. The two fields are
/// computed and persisted together so the stored pair never drifts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberXp {
    pub user_id: u64,
    pub guild_id: u64,
    pub xp: u64,
    pub level: u32,
}

/// Emitted when a gain pushes a member across a level threshold.
/// This is returned by the service so the Discord layer can announce it.
#[derive(Debug, Clone)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
}

/// A ledger entry together with its position in the guild ranking.
/// Rank is 1-based: 1 + the number of members with strictly more XP.
#[derive(Debug, Clone)]
pub struct RankedMember {
    pub record: MemberXp,
    pub rank: u64,
}

/// One page of the guild leaderboard, sorted by XP descending with ties
/// broken by ascending user id so repeated queries paginate identically.
#[derive(Debug, Clone)]
pub struct LeaderboardPage {
    pub entries: Vec<MemberXp>,
    pub page: u64,
    pub total_pages: u64,
    pub total_members: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    /// The member gained XP within the last cooldown window. Not a fault -
    /// callers on the message path ignore it.
    #[error("member is on XP cooldown")]
    OnCooldown,

    /// No ledger entry exists for a rank/progress query. Surfaced to users
    /// as "no XP yet", not as an error.
    #[error("no XP recorded for this member yet")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

// ============================================================================
// LEVEL MATH
// ============================================================================
// Pure functions - no side effects, total over their whole input range.

/// Level reached at `xp` total experience: `floor(sqrt(xp / 100))`.
///
/// Level 0 covers 0..=99 XP, level 1 starts at exactly 100, level 2 at 400,
/// and so on. The float estimate is corrected against the exact integer
/// thresholds so boundaries never suffer rounding drift.
pub fn level_for_xp(xp: u64) -> u32 {
    let mut level = (xp as f64 / 100.0).sqrt() as u64;
    while threshold(level + 1) <= xp as u128 {
        level += 1;
    }
    while level > 0 && threshold(level) > xp as u128 {
        level -= 1;
    }
    level as u32
}

/// XP required to reach `level`: `level^2 * 100`, the inverse of
/// [`level_for_xp`]. Saturates rather than overflowing for absurd levels.
pub fn xp_for_level(level: u32) -> u64 {
    let level = level as u64;
    level.saturating_mul(level).saturating_mul(100)
}

fn threshold(level: u64) -> u128 {
    level as u128 * level as u128 * 100
}

/// Fold a message gain into an existing record, or start a fresh one at
/// `xp = gain`. Returns the new record plus a level-up event if the gain
/// crossed a threshold (a brand-new record counts as coming from level 0).
///
/// Pure - persisting the record is the caller's job.
pub fn apply_gain(
    current: Option<MemberXp>,
    user_id: u64,
    guild_id: u64,
    gain: u64,
) -> (MemberXp, Option<LevelUpEvent>) {
    let old_xp = current.as_ref().map(|r| r.xp).unwrap_or(0);
    let old_level = current.as_ref().map(|r| r.level).unwrap_or(0);

    let new_xp = old_xp.saturating_add(gain);
    let new_level = level_for_xp(new_xp);

    let record = MemberXp {
        user_id,
        guild_id,
        xp: new_xp,
        level: new_level,
    };

    let level_up = (new_level > old_level).then(|| LevelUpEvent {
        user_id,
        guild_id,
        old_level,
        new_level,
        total_xp: new_xp,
    });

    (record, level_up)
}

/// Apply a signed administrative correction. The result is clamped at zero
/// and the level rederived; `delta = 0` returns the input unchanged.
pub fn apply_adjustment(
    current: Option<MemberXp>,
    user_id: u64,
    guild_id: u64,
    delta: i64,
) -> MemberXp {
    let old_xp = current.map(|r| r.xp).unwrap_or(0);
    let new_xp = if delta >= 0 {
        old_xp.saturating_add(delta as u64)
    } else {
        old_xp.saturating_sub(delta.unsigned_abs())
    };

    MemberXp {
        user_id,
        guild_id,
        xp: new_xp,
        level: level_for_xp(new_xp),
    }
}

/// Whole-percent progress from the current level's threshold to the next.
pub fn progress_percent(record: &MemberXp) -> u8 {
    let previous = xp_for_level(record.level);
    let next = xp_for_level(record.level + 1);
    let span = next.saturating_sub(previous).max(1);
    let into = record.xp.saturating_sub(previous).min(span);
    (into as u128 * 100 / span as u128) as u8
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================
// The core defines WHAT it needs from persistence, not HOW it's implemented.
// The infra layer provides SQLite for production and an in-memory map for
// tests.

#[async_trait]
pub trait XpStore: Send + Sync {
    /// Fetch the ledger entry for one member, if any.
    async fn get(&self, user_id: u64, guild_id: u64) -> Result<Option<MemberXp>, LevelingError>;

    /// Insert or replace the entry for the record's (user, guild) pair.
    /// `xp` and `level` land in the same write so the derived-level
    /// invariant holds in storage.
    async fn upsert(&self, record: &MemberXp) -> Result<(), LevelingError>;

    /// How many members of the guild hold strictly more XP than `xp`.
    async fn count_greater(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError>;

    /// One slice of the guild ranking: XP descending, ties broken by
    /// ascending user id.
    async fn page_by_xp_desc(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MemberXp>, LevelingError>;

    /// Total number of ledger entries for the guild.
    async fn count_all(&self, guild_id: u64) -> Result<u64, LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The main service for leveling operations.
///
/// **Generic over S: XpStore** - the service doesn't care whether the store
/// is SQLite or an in-memory map, it just uses the trait. The store and the
/// cooldown tracker are injected via the constructor.
pub struct LevelingService<S: XpStore> {
    store: S,
    cooldown: Arc<CooldownTracker>,
    gain_range: RangeInclusive<u64>,
}

impl<S: XpStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cooldown: Arc::new(CooldownTracker::default()),
            gain_range: MESSAGE_GAIN_RANGE,
        }
    }

    /// Handle one qualifying guild message.
    ///
    /// **Returns:**
    /// - `Ok(Some(event))` if the member leveled up
    /// - `Ok(None)` if XP was awarded without a level-up
    /// - `Err(LevelingError::OnCooldown)` if the member gained XP within
    ///   the last window
    /// - `Err(...)` for storage failures; the gain is dropped, not retried
    pub async fn process_message(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        if !self.cooldown.try_acquire(user_id, guild_id) {
            return Err(LevelingError::OnCooldown);
        }

        // The release runs on its own timer task, so a storage failure below
        // cannot leave the pair suppressed past the window.
        self.cooldown.schedule_release(user_id, guild_id);

        let gain = rand::thread_rng().gen_range(self.gain_range.clone());
        self.award_message_gain(user_id, guild_id, gain).await
    }

    /// The persistence half of `process_message`: read, fold the gain in,
    /// write back.
    async fn award_message_gain(
        &self,
        user_id: u64,
        guild_id: u64,
        gain: u64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        let current = self.store.get(user_id, guild_id).await?;
        let (record, level_up) = apply_gain(current, user_id, guild_id, gain);
        self.store.upsert(&record).await?;
        Ok(level_up)
    }

    /// A member's ledger entry plus their 1-based rank in the guild.
    pub async fn rank_of(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<RankedMember, LevelingError> {
        let record = self
            .store
            .get(user_id, guild_id)
            .await?
            .ok_or(LevelingError::NotFound)?;
        let rank = self.store.count_greater(guild_id, record.xp).await? + 1;
        Ok(RankedMember { record, rank })
    }

    /// Fetch one leaderboard page. Page numbers below 1 are normalized to 1
    /// rather than rejected, and pages past the end clamp to the last page.
    pub async fn leaderboard_page(
        &self,
        guild_id: u64,
        page: u64,
    ) -> Result<LeaderboardPage, LevelingError> {
        let total_members = self.store.count_all(guild_id).await?;
        let total_pages = total_members.div_ceil(PAGE_SIZE).max(1);
        let page = page.max(1).min(total_pages);
        let offset = (page - 1) * PAGE_SIZE;

        let entries = self
            .store
            .page_by_xp_desc(guild_id, offset, PAGE_SIZE)
            .await?;

        Ok(LeaderboardPage {
            entries,
            page,
            total_pages,
            total_members,
        })
    }

    /// Administrative XP correction (signed, clamped at zero). Unlike
    /// message gains, storage failures here surface to the caller so the
    /// invoking admin sees them.
    pub async fn adjust_xp(
        &self,
        user_id: u64,
        guild_id: u64,
        delta: i64,
    ) -> Result<MemberXp, LevelingError> {
        let current = self.store.get(user_id, guild_id).await?;
        let record = apply_adjustment(current, user_id, guild_id, delta);
        self.store.upsert(&record).await?;
        Ok(record)
    }

    #[cfg(test)]
    fn set_gain_range(&mut self, range: RangeInclusive<u64>) {
        self.gain_range = range;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::leveling::InMemoryXpStore;

    #[test]
    fn level_formula_boundaries() {
        assert_eq!(level_for_xp(0), 0);
        assert_eq!(level_for_xp(99), 0);
        assert_eq!(level_for_xp(100), 1);
        assert_eq!(level_for_xp(105), 1);
        assert_eq!(level_for_xp(399), 1);
        assert_eq!(level_for_xp(400), 2);
        assert_eq!(level_for_xp(2_500), 5);
    }

    #[test]
    fn xp_for_level_is_the_inverse_threshold() {
        assert_eq!(xp_for_level(0), 0);
        assert_eq!(xp_for_level(1), 100);
        assert_eq!(xp_for_level(2), 400);
        assert_eq!(xp_for_level(10), 10_000);

        for level in 0..500 {
            assert_eq!(level_for_xp(xp_for_level(level)), level);
            if level > 0 {
                assert_eq!(level_for_xp(xp_for_level(level) - 1), level - 1);
            }
        }
    }

    #[test]
    fn level_formula_does_not_drift_at_large_totals() {
        // Around 10^16 XP the f64 estimate can be off by one; the integer
        // correction must still land exactly on the threshold.
        let level = 10_000_000u32;
        let at = xp_for_level(level);
        assert_eq!(level_for_xp(at), level);
        assert_eq!(level_for_xp(at - 1), level - 1);
        assert_eq!(level_for_xp(u64::MAX), 429_496_729);
    }

    #[test]
    fn gain_on_fresh_record_starts_at_the_gain() {
        let (record, level_up) = apply_gain(None, 1, 2, 20);
        assert_eq!(
            record,
            MemberXp {
                user_id: 1,
                guild_id: 2,
                xp: 20,
                level: 0
            }
        );
        assert!(level_up.is_none());
    }

    #[test]
    fn gain_crossing_a_threshold_reports_a_level_up() {
        let current = MemberXp {
            user_id: 1,
            guild_id: 2,
            xp: 95,
            level: 0,
        };
        let (record, level_up) = apply_gain(Some(current), 1, 2, 10);
        assert_eq!(record.xp, 105);
        assert_eq!(record.level, 1);

        let event = level_up.expect("crossing 100 XP should level up");
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 1);
        assert_eq!(event.total_xp, 105);
    }

    #[test]
    fn adjustment_clamps_at_zero() {
        let current = MemberXp {
            user_id: 1,
            guild_id: 2,
            xp: 50,
            level: 0,
        };
        let record = apply_adjustment(Some(current), 1, 2, -100);
        assert_eq!(record.xp, 0);
        assert_eq!(record.level, 0);
    }

    #[test]
    fn zero_adjustment_is_an_identity() {
        let current = MemberXp {
            user_id: 1,
            guild_id: 2,
            xp: 450,
            level: 2,
        };
        let record = apply_adjustment(Some(current.clone()), 1, 2, 0);
        assert_eq!(record, current);
    }

    #[test]
    fn adjustment_rederives_the_level() {
        let record = apply_adjustment(None, 1, 2, 450);
        assert_eq!(record.xp, 450);
        assert_eq!(record.level, 2);
    }

    #[test]
    fn progress_percent_tracks_the_current_level_span() {
        let record = MemberXp {
            user_id: 1,
            guild_id: 2,
            xp: 100,
            level: 1,
        };
        assert_eq!(progress_percent(&record), 0);

        // Level 1 spans 100..400, so 250 XP is exactly halfway.
        let record = MemberXp { xp: 250, ..record };
        assert_eq!(progress_percent(&record), 50);

        let record = MemberXp { xp: 399, ..record };
        assert_eq!(progress_percent(&record), 99);
    }

    #[tokio::test]
    async fn rank_counts_strictly_greater_totals() {
        let service = LevelingService::new(InMemoryXpStore::new());
        service.adjust_xp(1, 7, 300).await.unwrap();
        service.adjust_xp(2, 7, 150).await.unwrap();
        service.adjust_xp(3, 7, 150).await.unwrap();

        assert_eq!(service.rank_of(1, 7).await.unwrap().rank, 1);
        // Equal totals share the same rank: both sit behind one member.
        assert_eq!(service.rank_of(2, 7).await.unwrap().rank, 2);
        assert_eq!(service.rank_of(3, 7).await.unwrap().rank, 2);
    }

    #[tokio::test]
    async fn rank_of_unknown_member_is_not_found() {
        let service = LevelingService::new(InMemoryXpStore::new());
        assert!(matches!(
            service.rank_of(99, 7).await,
            Err(LevelingError::NotFound)
        ));
    }

    #[tokio::test]
    async fn leaderboard_pages_are_normalized_and_clamped() {
        let service = LevelingService::new(InMemoryXpStore::new());
        for user_id in 1..=12 {
            service.adjust_xp(user_id, 7, user_id as i64 * 10).await.unwrap();
        }

        // Page 0 normalizes to 1.
        let first = service.leaderboard_page(7, 0).await.unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.total_members, 12);
        assert_eq!(first.entries.len(), 10);
        assert_eq!(first.entries[0].user_id, 12);

        // Pages past the end clamp to the last page.
        let last = service.leaderboard_page(7, 50).await.unwrap();
        assert_eq!(last.page, 2);
        assert_eq!(last.entries.len(), 2);
        assert_eq!(last.entries[1].user_id, 1);
    }

    #[tokio::test]
    async fn leaderboard_of_empty_guild_is_one_empty_page() {
        let service = LevelingService::new(InMemoryXpStore::new());
        let page = service.leaderboard_page(7, 1).await.unwrap();
        assert_eq!(page.total_members, 0);
        assert_eq!(page.total_pages, 1);
        assert!(page.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn message_flow_awards_xp_and_respects_the_cooldown() {
        let mut service = LevelingService::new(InMemoryXpStore::new());
        service.set_gain_range(20..=20);

        // First qualifying message: fresh record at the rolled gain.
        let level_up = service.process_message(5, 7).await.unwrap();
        assert!(level_up.is_none());
        let ranked = service.rank_of(5, 7).await.unwrap();
        assert_eq!(ranked.record.xp, 20);
        assert_eq!(ranked.record.level, 0);

        // Second message inside the window: suppressed, ledger untouched.
        assert!(matches!(
            service.process_message(5, 7).await,
            Err(LevelingError::OnCooldown)
        ));
        assert_eq!(service.rank_of(5, 7).await.unwrap().record.xp, 20);

        // After the window the scheduled release has fired and a third
        // message lands.
        tokio::time::sleep(cooldown::COOLDOWN_WINDOW + std::time::Duration::from_secs(1)).await;
        service.set_gain_range(90..=90);

        let level_up = service
            .process_message(5, 7)
            .await
            .unwrap()
            .expect("110 XP crosses level 1");
        assert_eq!(level_up.old_level, 0);
        assert_eq!(level_up.new_level, 1);
        assert_eq!(level_up.total_xp, 110);

        let ranked = service.rank_of(5, 7).await.unwrap();
        assert_eq!(ranked.record.xp, 110);
        assert_eq!(ranked.record.level, 1);
    }
}
