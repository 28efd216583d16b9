//! # SQLite record store
//!
//! Maps the four record namespaces onto SQLite tables. Ids are stored as
//! INTEGER (cast from u64), timestamps as unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fw_core::{
    ContentId, EditMarker, ImageBlacklist, ImageHash, PermissionTier, RestoreQueue, Result,
    ReviewLedger, TrustRegistry, UserId, UserTrust, WardenError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::future::Future;
use std::str::FromStr;

/// Pool and reconnect settings.
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    pub max_connections: u32,
    pub connect_timeout: std::time::Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: std::time::Duration,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: std::time::Duration::from_secs(5),
            reconnect_attempts: 3,
            reconnect_backoff: std::time::Duration::from_millis(500),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    options: SqliteStoreOptions,
}

impl SqliteStore {
    /// Opens (creating if missing) the database and initializes the schema.
    pub async fn new(url: &str, options: SqliteStoreOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str(url)
            .map_err(|e| WardenError::Config(format!("bad store url: {e}")))?
            .create_if_missing(true);

        // Each connection to `:memory:` is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { options.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect_with(connect)
            .await
            .map_err(|e| WardenError::StoreUnavailable(e.to_string()))?;

        let store = Self { pool, options };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS reviewed_content (
                forum TEXT NOT NULL,
                content_id INTEGER NOT NULL,
                edit_marker INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (forum, content_id)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS reviewed_content_recorded_at ON reviewed_content(recorded_at);"#,
            r#"
            CREATE TABLE IF NOT EXISTS user_trust (
                forum TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                permission_tier INTEGER NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (forum, user_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS image_ban (
                forum TEXT NOT NULL,
                perceptual_hash CHAR(16) NOT NULL,
                source_ref TEXT NOT NULL DEFAULT '',
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (forum, perceptual_hash)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pending_restore (
                forum TEXT NOT NULL,
                thread_id INTEGER NOT NULL,
                flag INTEGER NOT NULL DEFAULT 1,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (forum, thread_id)
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| WardenError::StoreUnavailable(e.to_string()))?;
        }

        Ok(())
    }

    /// Runs `op`, retrying connection-class failures a bounded number of times.
    async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_connection_error(&e) && attempt < self.options.reconnect_attempts => {
                    attempt += 1;
                    tracing::warn!(op = what, attempt, error = %e, "Store connection lost, retrying");
                    tokio::time::sleep(self.options.reconnect_backoff * attempt).await;
                }
                Err(e) => return Err(map_sqlx_error(what, e)),
            }
        }
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed
    )
}

fn map_sqlx_error(what: &str, e: sqlx::Error) -> WardenError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            WardenError::InvalidData(format!("{what}: {e}"))
        }
        other => WardenError::StoreUnavailable(format!("{what}: {other}")),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[async_trait]
impl ReviewLedger for SqliteStore {
    async fn reviewed(&self, forum: &str, id: ContentId) -> Result<Option<EditMarker>> {
        let row = self
            .run("reviewed", move || {
                sqlx::query("SELECT edit_marker FROM reviewed_content WHERE forum = ? AND content_id = ?")
                    .bind(forum)
                    .bind(id.0 as i64)
                    .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("edit_marker")))
    }

    async fn mark_reviewed(&self, forum: &str, id: ContentId, marker: EditMarker) -> Result<()> {
        let now = now_millis();
        self.run("mark_reviewed", move || {
            sqlx::query(
                "INSERT INTO reviewed_content (forum, content_id, edit_marker, recorded_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(forum, content_id) DO UPDATE SET edit_marker = excluded.edit_marker, recorded_at = excluded.recorded_at",
            )
            .bind(forum)
            .bind(id.0 as i64)
            .bind(marker)
            .bind(now)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn sweep_reviewed(&self, max_age: Duration) -> Result<u64> {
        let cutoff = (Utc::now() - max_age).timestamp_millis();
        let done = self
            .run("sweep_reviewed", move || {
                sqlx::query("DELETE FROM reviewed_content WHERE recorded_at < ?")
                    .bind(cutoff)
                    .execute(&self.pool)
            })
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl TrustRegistry for SqliteStore {
    async fn user_trust(&self, forum: &str, user_id: UserId) -> Result<Option<UserTrust>> {
        let row = self
            .run("user_trust", move || {
                sqlx::query("SELECT permission_tier, note, recorded_at FROM user_trust WHERE forum = ? AND user_id = ?")
                    .bind(forum)
                    .bind(user_id.0 as i64)
                    .fetch_optional(&self.pool)
            })
            .await?;

        Ok(row.map(|r| UserTrust {
            user_id,
            tier: PermissionTier::from_stored(r.get("permission_tier")),
            note: r.get("note"),
            recorded_at: from_millis(r.get("recorded_at")),
        }))
    }

    async fn set_user_trust(&self, forum: &str, user_id: UserId, tier: PermissionTier, note: &str) -> Result<()> {
        if tier == PermissionTier::Neutral {
            return self.clear_user_trust(forum, user_id).await;
        }

        let now = now_millis();
        // Last write wins by timestamp, so a replayed older write is a no-op.
        self.run("set_user_trust", move || {
            sqlx::query(
                "INSERT INTO user_trust (forum, user_id, permission_tier, note, recorded_at) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(forum, user_id) DO UPDATE SET
                    permission_tier = excluded.permission_tier,
                    note = excluded.note,
                    recorded_at = excluded.recorded_at
                 WHERE excluded.recorded_at >= user_trust.recorded_at",
            )
            .bind(forum)
            .bind(user_id.0 as i64)
            .bind(tier.as_stored())
            .bind(note)
            .bind(now)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn clear_user_trust(&self, forum: &str, user_id: UserId) -> Result<()> {
        self.run("clear_user_trust", move || {
            sqlx::query("DELETE FROM user_trust WHERE forum = ? AND user_id = ?")
                .bind(forum)
                .bind(user_id.0 as i64)
                .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn operators(&self, forum: &str, min_tier: PermissionTier, limit: usize) -> Result<Vec<UserId>> {
        let rows = self
            .run("operators", move || {
                sqlx::query(
                    "SELECT user_id FROM user_trust WHERE forum = ? AND permission_tier >= ?
                     ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
                )
                .bind(forum)
                .bind(min_tier.as_stored().max(1))
                .bind(limit as i64)
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows.into_iter().map(|r| UserId(r.get::<i64, _>("user_id") as u64)).collect())
    }
}

#[async_trait]
impl ImageBlacklist for SqliteStore {
    async fn image_banned(&self, forum: &str, hash: ImageHash) -> Result<bool> {
        let key = hash.to_string();
        let row = self
            .run("image_banned", || {
                sqlx::query("SELECT 1 FROM image_ban WHERE forum = ? AND perceptual_hash = ?")
                    .bind(forum)
                    .bind(key.clone())
                    .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.is_some())
    }

    async fn ban_image(&self, forum: &str, hash: ImageHash, source_ref: &str) -> Result<()> {
        let key = hash.to_string();
        let now = now_millis();
        self.run("ban_image", || {
            sqlx::query(
                "INSERT INTO image_ban (forum, perceptual_hash, source_ref, recorded_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(forum, perceptual_hash) DO UPDATE SET source_ref = excluded.source_ref",
            )
            .bind(forum)
            .bind(key.clone())
            .bind(source_ref)
            .bind(now)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn unban_image(&self, forum: &str, hash: ImageHash) -> Result<()> {
        let key = hash.to_string();
        self.run("unban_image", || {
            sqlx::query("DELETE FROM image_ban WHERE forum = ? AND perceptual_hash = ?")
                .bind(forum)
                .bind(key.clone())
                .execute(&self.pool)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RestoreQueue for SqliteStore {
    async fn pending_restores(&self, forum: &str) -> Result<Vec<ContentId>> {
        let rows = self
            .run("pending_restores", move || {
                sqlx::query("SELECT thread_id FROM pending_restore WHERE forum = ? AND flag = 1 ORDER BY recorded_at ASC")
                    .bind(forum)
                    .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.into_iter().map(|r| ContentId(r.get::<i64, _>("thread_id") as u64)).collect())
    }

    async fn add_pending(&self, forum: &str, thread_id: ContentId) -> Result<()> {
        let now = now_millis();
        self.run("add_pending", move || {
            sqlx::query(
                "INSERT INTO pending_restore (forum, thread_id, flag, recorded_at) VALUES (?, ?, 1, ?)
                 ON CONFLICT(forum, thread_id) DO UPDATE SET flag = 1, recorded_at = excluded.recorded_at",
            )
            .bind(forum)
            .bind(thread_id.0 as i64)
            .bind(now)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn remove_pending(&self, forum: &str, thread_id: ContentId) -> Result<()> {
        self.run("remove_pending", move || {
            sqlx::query("DELETE FROM pending_restore WHERE forum = ? AND thread_id = ?")
                .bind(forum)
                .bind(thread_id.0 as i64)
                .execute(&self.pool)
        })
        .await?;
        Ok(())
    }
}
