// In-memory implementation of XpStore.
//
// Used by tests (and handy for local development without a database file).
// It follows the same contract as the SQLite implementation, including the
// tie-break ordering, so anything verified against this store holds for
// production paging too.

use crate::core::leveling::{LevelingError, MemberXp, XpStore};
use async_trait::async_trait;
use dashmap::DashMap;

/// A composite key for looking up ledger entries.
/// We need both user_id AND guild_id since users can be in multiple guilds.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct UserGuildKey {
    user_id: u64,
    guild_id: u64,
}

/// DashMap is a concurrent HashMap that's safe to share across async tasks,
/// which matters because multiple Discord events can hit the store at once.
#[allow(dead_code)]
pub struct InMemoryXpStore {
    records: DashMap<UserGuildKey, MemberXp>,
}

#[allow(dead_code)]
impl InMemoryXpStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryXpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XpStore for InMemoryXpStore {
    async fn get(&self, user_id: u64, guild_id: u64) -> Result<Option<MemberXp>, LevelingError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, record: &MemberXp) -> Result<(), LevelingError> {
        let key = UserGuildKey {
            user_id: record.user_id,
            guild_id: record.guild_id,
        };
        self.records.insert(key, record.clone());
        Ok(())
    }

    async fn count_greater(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id && entry.value().xp > xp)
            .count() as u64)
    }

    async fn page_by_xp_desc(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MemberXp>, LevelingError> {
        let mut entries: Vec<MemberXp> = self
            .records
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();

        // XP descending, equal totals ordered by user id so pagination is
        // reproducible across queries.
        entries.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.user_id.cmp(&b.user_id)));

        Ok(entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_all(&self, guild_id: u64) -> Result<u64, LevelingError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: u64, guild_id: u64, xp: u64) -> MemberXp {
        MemberXp {
            user_id,
            guild_id,
            xp,
            level: crate::core::leveling::level_for_xp(xp),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = InMemoryXpStore::new();

        assert_eq!(store.get(1, 2).await.unwrap(), None);

        store.upsert(&record(1, 2, 150)).await.unwrap();
        let fetched = store.get(1, 2).await.unwrap().unwrap();
        assert_eq!(fetched.xp, 150);
        assert_eq!(fetched.level, 1);

        // A second upsert replaces, not accumulates.
        store.upsert(&record(1, 2, 90)).await.unwrap();
        let fetched = store.get(1, 2).await.unwrap().unwrap();
        assert_eq!(fetched.xp, 90);
        assert_eq!(fetched.level, 0);
    }

    #[tokio::test]
    async fn counts_are_scoped_to_the_guild() {
        let store = InMemoryXpStore::new();
        store.upsert(&record(1, 100, 300)).await.unwrap();
        store.upsert(&record(2, 100, 150)).await.unwrap();
        store.upsert(&record(3, 200, 900)).await.unwrap();

        assert_eq!(store.count_all(100).await.unwrap(), 2);
        assert_eq!(store.count_all(200).await.unwrap(), 1);
        assert_eq!(store.count_greater(100, 150).await.unwrap(), 1);
        assert_eq!(store.count_greater(100, 149).await.unwrap(), 2);
        assert_eq!(store.count_greater(100, 300).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn paging_breaks_ties_by_user_id() {
        let store = InMemoryXpStore::new();
        store.upsert(&record(9, 100, 150)).await.unwrap();
        store.upsert(&record(4, 100, 300)).await.unwrap();
        store.upsert(&record(2, 100, 150)).await.unwrap();

        let page = store.page_by_xp_desc(100, 0, 10).await.unwrap();
        let order: Vec<u64> = page.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![4, 2, 9]);

        let tail = store.page_by_xp_desc(100, 2, 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].user_id, 9);
    }
}
