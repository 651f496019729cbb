use crate::core::leveling::{LevelingError, MemberXp, XpStore};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed implementation of XpStore.
///
/// One row per (user, guild) pair; `xp` and `level` live in the same row and
/// are always written in the same statement, so the stored level can never
/// drift from the stored XP.
pub struct SqliteXpStore {
    pool: Pool<Sqlite>,
}

impl SqliteXpStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS levels (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, guild_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl XpStore for SqliteXpStore {
    async fn get(&self, user_id: u64, guild_id: u64) -> Result<Option<MemberXp>, LevelingError> {
        let row = sqlx::query("SELECT xp, level FROM levels WHERE user_id = ? AND guild_id = ?")
            .bind(user_id as i64)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.map(|row| MemberXp {
            user_id,
            guild_id,
            xp: row.get::<i64, _>("xp") as u64,
            level: row.get::<i64, _>("level") as u32,
        }))
    }

    async fn upsert(&self, record: &MemberXp) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO levels (user_id, guild_id, xp, level)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                xp = excluded.xp,
                level = excluded.level
            "#,
        )
        .bind(record.user_id as i64)
        .bind(record.guild_id as i64)
        .bind(record.xp as i64)
        .bind(record.level as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn count_greater(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM levels WHERE guild_id = ? AND xp > ?")
            .bind(guild_id as i64)
            .bind(xp as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn page_by_xp_desc(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MemberXp>, LevelingError> {
        // The secondary user_id sort keeps pagination stable when several
        // members hold the same total.
        let rows = sqlx::query(
            r#"
            SELECT user_id, guild_id, xp, level FROM levels
            WHERE guild_id = ?
            ORDER BY xp DESC, user_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| MemberXp {
                user_id: row.get::<i64, _>("user_id") as u64,
                guild_id: row.get::<i64, _>("guild_id") as u64,
                xp: row.get::<i64, _>("xp") as u64,
                level: row.get::<i64, _>("level") as u32,
            })
            .collect())
    }

    async fn count_all(&self, guild_id: u64) -> Result<u64, LevelingError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM levels WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.get::<i64, _>("n") as u64)
    }
}
