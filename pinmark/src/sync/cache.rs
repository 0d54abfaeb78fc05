use std::{fs, path::Path};

use pinboard_core::{join_tags, split_tags};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;

use super::model::{LocalBookmark, LocalTag};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const BOOKMARK_COLUMNS: &str =
    "remote_id, url, title, note, tags, created_at, updated_at, is_private, unread";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Durable bookmark and tag cache. Every write is a single statement.
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, CacheError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), CacheError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_bookmark(
        &self,
        bookmark: &LocalBookmark,
    ) -> Result<UpsertOutcome, CacheError> {
        let outcome = match self.get_bookmark(&bookmark.remote_id).await? {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing == *bookmark => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };

        sqlx::query(
            "INSERT INTO bookmarks (
                remote_id, url, title, note, tags, created_at, updated_at, is_private, unread
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(remote_id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                note = excluded.note,
                tags = excluded.tags,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_private = excluded.is_private,
                unread = excluded.unread",
        )
        .bind(&bookmark.remote_id)
        .bind(&bookmark.url)
        .bind(&bookmark.title)
        .bind(&bookmark.note)
        .bind(join_tags(&bookmark.tags))
        .bind(bookmark.created_at)
        .bind(bookmark.updated_at)
        .bind(if bookmark.is_private { 1 } else { 0 })
        .bind(if bookmark.unread { 1 } else { 0 })
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    pub async fn get_bookmark(&self, remote_id: &str) -> Result<Option<LocalBookmark>, CacheError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE remote_id = ?1"
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(bookmark_from_row).transpose()
    }

    /// Returns whether a row was removed.
    pub async fn delete_bookmark(&self, remote_id: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE remote_id = ?1")
            .bind(remote_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All bookmarks, newest first.
    pub async fn query_all(&self) -> Result<Vec<LocalBookmark>, CacheError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks ORDER BY created_at DESC, remote_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bookmark_from_row).collect()
    }

    pub async fn query_by_read_state(&self, unread: bool) -> Result<Vec<LocalBookmark>, CacheError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
             WHERE unread = ?1
             ORDER BY created_at DESC, remote_id ASC"
        ))
        .bind(if unread { 1 } else { 0 })
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bookmark_from_row).collect()
    }

    pub async fn query_by_tag(&self, tag: &str) -> Result<Vec<LocalBookmark>, CacheError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
             WHERE instr(' ' || tags || ' ', ' ' || ?1 || ' ') > 0
             ORDER BY created_at DESC, remote_id ASC"
        ))
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bookmark_from_row).collect()
    }

    /// Bookmarks created at or after `oldest`, optionally restricted to one tag.
    pub async fn query_created_since(
        &self,
        oldest: i64,
        tag: Option<&str>,
    ) -> Result<Vec<LocalBookmark>, CacheError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
             WHERE created_at >= ?1
               AND (?2 IS NULL OR instr(' ' || tags || ' ', ' ' || ?2 || ' ') > 0)
             ORDER BY created_at DESC, remote_id ASC"
        ))
        .bind(oldest)
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bookmark_from_row).collect()
    }

    pub async fn count_bookmarks(&self) -> Result<i64, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bookmarks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn upsert_tag(&self, tag: &LocalTag) -> Result<UpsertOutcome, CacheError> {
        let existing: Option<i64> = sqlx::query("SELECT count FROM tags WHERE name = ?1")
            .bind(&tag.name)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get("count"))
            .transpose()?;
        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(count) if count == tag.count => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };

        sqlx::query(
            "INSERT INTO tags (name, count) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET count = excluded.count",
        )
        .bind(&tag.name)
        .bind(tag.count)
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    pub async fn delete_tag(&self, name: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM tags WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn query_tags(&self) -> Result<Vec<LocalTag>, CacheError> {
        let rows = sqlx::query("SELECT name, count FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<LocalTag, CacheError> {
                Ok(LocalTag {
                    name: row.try_get("name")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn count_tags(&self) -> Result<i64, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tags")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Drops every cached bookmark and tag.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bookmarks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tags").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn bookmark_from_row(row: &SqliteRow) -> Result<LocalBookmark, CacheError> {
    let tags: String = row.try_get("tags")?;
    let is_private: i64 = row.try_get("is_private")?;
    let unread: i64 = row.try_get("unread")?;
    Ok(LocalBookmark {
        remote_id: row.try_get("remote_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        note: row.try_get("note")?,
        tags: split_tags(&tags),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_private: is_private != 0,
        unread: unread != 0,
    })
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
