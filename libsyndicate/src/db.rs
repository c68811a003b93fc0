//! Database operations for Syndicate
//!
//! Storage access for the publishing engine: the pooled [`Database`]
//! handle carries the read queries and the atomic claim updates, and
//! [`UnitOfWork`] groups one item's publish-attempt writes into a
//! single transaction.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    AccountStatus, ContentItem, DestinationAccount, ItemStatus, MediaAttachment, MediaKind,
    PlatformId, Publication, PublicationStatus,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work for SQLite URLs on every platform;
        // mode=rwc creates the file when missing.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database with migrations applied. Test-oriented, but a
    /// regular constructor so integration tests outside the crate can
    /// use it.
    pub async fn in_memory() -> Result<Self> {
        // Every pooled connection to :memory: would get its own empty
        // database, so the pool is pinned to a single connection.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    // ========================================================================
    // Content items
    // ========================================================================

    /// Insert a content item. The engine itself never authors content;
    /// this is the seam the authoring flow (and the tests) write through.
    pub async fn insert_item(&self, item: &ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items (
                id, user_id, body, content_type, status, scheduled_at, published_at,
                is_scheduled, error_message, retry_count, last_retry_at, failed_at,
                parent_item_id, comment_delay_minutes, reply_to_post_id,
                adhoc_account_id, adhoc_platform, adhoc_post_id, adhoc_post_url,
                options, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.user_id)
        .bind(&item.body)
        .bind(&item.content_type)
        .bind(item.status.as_str())
        .bind(item.scheduled_at)
        .bind(item.published_at)
        .bind(item.is_scheduled as i64)
        .bind(&item.error_message)
        .bind(item.retry_count)
        .bind(item.last_retry_at)
        .bind(item.failed_at)
        .bind(&item.parent_item_id)
        .bind(item.comment_delay_minutes)
        .bind(&item.reply_to_post_id)
        .bind(&item.adhoc_account_id)
        .bind(item.adhoc_platform.map(|p| p.as_str()))
        .bind(&item.adhoc_post_id)
        .bind(&item.adhoc_post_url)
        .bind(&item.options)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(map_item).transpose()
    }

    /// Atomic claim: `scheduled -> publishing`, guarded on the current
    /// status so concurrent passes cannot double-claim. Returns false
    /// when another pass already owns the item.
    pub async fn claim_item(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE content_items SET status = 'publishing' WHERE id = ? AND status = 'scheduled'",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Target-level lease for items resumed in `publishing`: claims one
    /// publication `scheduled -> publishing` with the same conditional
    /// discipline as the item claim.
    pub async fn claim_publication(&self, publication_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE publications SET status = 'publishing' WHERE id = ? AND status = 'scheduled'",
        )
        .bind(publication_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Compensating update after a failed commit: return a claimed item
    /// to `scheduled` with retry bookkeeping, so it is never silently
    /// stranded in `publishing`. Runs outside the rollback boundary.
    pub async fn release_claim_for_retry(
        &self,
        item_id: &str,
        error: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE content_items
            SET status = 'scheduled', retry_count = retry_count + 1,
                last_retry_at = ?, error_message = ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        // Claimed publications go back too.
        sqlx::query(
            "UPDATE publications SET status = 'scheduled' WHERE item_id = ? AND status = 'publishing'",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Due items in oldest-first fairness order: scheduled items whose
    /// time has arrived, plus items with retry-eligible targets left
    /// over from a prior pass. An aggregate success does not stop
    /// remaining targets from retrying, so published items with
    /// scheduled targets come back too. Replies are gated on the parent
    /// having published, regardless of their own elapsed schedule.
    pub async fn find_due_items(&self, now: i64) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            r#"
            SELECT i.* FROM content_items i
            WHERE (
                (i.status = 'scheduled' AND i.scheduled_at IS NOT NULL AND i.scheduled_at <= ?)
                OR (i.status IN ('publishing', 'published') AND EXISTS (
                        SELECT 1 FROM publications p
                        WHERE p.item_id = i.id AND p.status = 'scheduled'))
            )
            AND (i.parent_item_id IS NULL OR EXISTS (
                    SELECT 1 FROM content_items parent
                    WHERE parent.id = i.parent_item_id AND parent.status = 'published'))
            ORDER BY i.scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_item).collect()
    }

    /// Diagnostic: items still `scheduled` past the staleness threshold.
    /// Read-only; signals an outage, not something to auto-remediate.
    pub async fn find_missed_items(&self, now: i64, threshold_secs: i64) -> Result<Vec<ContentItem>> {
        let cutoff = now - threshold_secs;
        let rows = sqlx::query(
            r#"
            SELECT * FROM content_items
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at < ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_item).collect()
    }

    /// Diagnostic: items stuck in `publishing` with no retry-eligible
    /// target, older than the threshold. A stale lease flag, read-only.
    pub async fn find_stale_publishing(
        &self,
        now: i64,
        threshold_secs: i64,
    ) -> Result<Vec<ContentItem>> {
        let cutoff = now - threshold_secs;
        let rows = sqlx::query(
            r#"
            SELECT i.* FROM content_items i
            WHERE i.status = 'publishing'
              AND i.scheduled_at IS NOT NULL AND i.scheduled_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM publications p
                  WHERE p.item_id = i.id AND p.status = 'scheduled')
            ORDER BY i.scheduled_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_item).collect()
    }

    /// Resolve the parent's platform post id for a reply dispatch,
    /// preferring the parent publication on the same platform and
    /// falling back to the parent's adhoc receipt or any published target.
    pub async fn resolve_parent_post_id(
        &self,
        parent_item_id: &str,
        platform: PlatformId,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(
                (SELECT platform_post_id FROM publications
                 WHERE item_id = ?1 AND platform = ?2 AND status = 'published'),
                (SELECT adhoc_post_id FROM content_items WHERE id = ?1),
                (SELECT platform_post_id FROM publications
                 WHERE item_id = ?1 AND status = 'published' LIMIT 1)
            ) AS post_id
            "#,
        )
        .bind(parent_item_id)
        .bind(platform.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("post_id"))
    }

    // ========================================================================
    // Publications
    // ========================================================================

    /// Insert a publication. The UNIQUE(item_id, platform) constraint
    /// rejects a second target for an already-represented platform.
    pub async fn insert_publication(&self, publication: &Publication) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publications (
                id, item_id, account_id, platform, status, platform_post_id,
                platform_url, scheduled_for, published_at, retry_count,
                last_retry_at, error_message, failed_at, reply_to_post_id,
                like_count, reply_count, view_count, last_synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&publication.id)
        .bind(&publication.item_id)
        .bind(&publication.account_id)
        .bind(publication.platform.as_str())
        .bind(publication.status.as_str())
        .bind(&publication.platform_post_id)
        .bind(&publication.platform_url)
        .bind(publication.scheduled_for)
        .bind(publication.published_at)
        .bind(publication.retry_count)
        .bind(publication.last_retry_at)
        .bind(&publication.error_message)
        .bind(publication.failed_at)
        .bind(&publication.reply_to_post_id)
        .bind(publication.like_count)
        .bind(publication.reply_count)
        .bind(publication.view_count)
        .bind(publication.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_publication(&self, publication_id: &str) -> Result<Option<Publication>> {
        let row = sqlx::query("SELECT * FROM publications WHERE id = ?")
            .bind(publication_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(map_publication).transpose()
    }

    pub async fn list_publications(&self, item_id: &str) -> Result<Vec<Publication>> {
        let rows = sqlx::query("SELECT * FROM publications WHERE item_id = ? ORDER BY platform")
            .bind(item_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_publication).collect()
    }

    // ========================================================================
    // Destination accounts & media
    // ========================================================================

    pub async fn insert_account(&self, account: &DestinationAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO destination_accounts (
                id, user_id, platform, handle, platform_user_id, status,
                access_token, refresh_token, token_expires_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.handle)
        .bind(&account.platform_user_id)
        .bind(account.status.as_str())
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.token_expires_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<DestinationAccount>> {
        let row = sqlx::query("SELECT * FROM destination_accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(map_account).transpose()
    }

    pub async fn insert_media(&self, media: &MediaAttachment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media_attachments (id, item_id, position, kind, url, alt_text)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&media.id)
        .bind(&media.item_id)
        .bind(media.position)
        .bind(media.kind.as_str())
        .bind(&media.url)
        .bind(&media.alt_text)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Ordered media for an item; position 0 is the carousel cover.
    pub async fn list_media(&self, item_id: &str) -> Result<Vec<MediaAttachment>> {
        let rows =
            sqlx::query("SELECT * FROM media_attachments WHERE item_id = ? ORDER BY position")
                .bind(item_id)
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        rows.into_iter().map(map_media).collect()
    }

    // ========================================================================
    // Unit of work
    // ========================================================================

    /// Open the transactional boundary for one item's publish attempt.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self.pool.begin().await.map_err(DbError::SqlxError)?;
        Ok(UnitOfWork { tx })
    }
}

/// Transactional boundary for one content item's publish attempt.
///
/// All writes produced by steps 3-5 of a pass (target outcomes, the
/// aggregate item status, and reply-eligibility bookkeeping) go through
/// one unit of work: either the whole attempt commits or none of it
/// does. Dropping without `commit` rolls back.
///
/// The increment-retry path and the mark-terminal path are separate
/// methods; a target outcome is exactly one of them.
pub struct UnitOfWork {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

impl UnitOfWork {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn mark_publication_published(
        &mut self,
        publication_id: &str,
        post_id: &str,
        url: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications
            SET status = 'published', platform_post_id = ?, platform_url = ?,
                published_at = ?, error_message = NULL
            WHERE id = ?
            "#,
        )
        .bind(post_id)
        .bind(url)
        .bind(now)
        .bind(publication_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Transient failure under the retry ceiling: the target goes back
    /// to `scheduled` and stays eligible for a later pass.
    pub async fn record_retryable_failure(
        &mut self,
        publication_id: &str,
        error: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications
            SET status = 'scheduled', retry_count = retry_count + 1,
                last_retry_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(publication_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Permanent failure, or the retry ceiling was exceeded.
    pub async fn record_terminal_failure(
        &mut self,
        publication_id: &str,
        error: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications
            SET status = 'failed', failed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(publication_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn mark_item_published(
        &mut self,
        item_id: &str,
        adhoc_receipt: Option<(&str, Option<&str>)>,
        now: i64,
    ) -> Result<()> {
        match adhoc_receipt {
            Some((post_id, url)) => {
                sqlx::query(
                    r#"
                    UPDATE content_items
                    SET status = 'published',
                        published_at = COALESCE(published_at, ?),
                        error_message = NULL,
                        adhoc_post_id = ?, adhoc_post_url = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(post_id)
                .bind(url)
                .bind(item_id)
                .execute(&mut *self.tx)
                .await
                .map_err(DbError::SqlxError)?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE content_items
                    SET status = 'published',
                        published_at = COALESCE(published_at, ?),
                        error_message = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(item_id)
                .execute(&mut *self.tx)
                .await
                .map_err(DbError::SqlxError)?;
            }
        }

        Ok(())
    }

    pub async fn mark_item_failed(&mut self, item_id: &str, error: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE content_items
            SET status = 'failed', failed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(item_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Implicit-target transient failure: the item itself carries the
    /// retry bookkeeping and returns to `scheduled` for a later pass.
    pub async fn record_item_retryable_failure(
        &mut self,
        item_id: &str,
        error: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE content_items
            SET status = 'scheduled', retry_count = retry_count + 1,
                last_retry_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(item_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Reply-eligibility bookkeeping after a parent publishes: resolve
    /// `reply_to_post_id` on every scheduled reply of the parent,
    /// preferring the parent target on the reply's own platform. No
    /// dispatch happens here; the replies keep their authored schedule.
    pub async fn cascade_replies(&mut self, parent_item_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publications
            SET reply_to_post_id = COALESCE(
                (SELECT pp.platform_post_id FROM publications pp
                 WHERE pp.item_id = ?1 AND pp.platform = publications.platform
                   AND pp.status = 'published'),
                (SELECT adhoc_post_id FROM content_items WHERE id = ?1),
                (SELECT pp.platform_post_id FROM publications pp
                 WHERE pp.item_id = ?1 AND pp.status = 'published' LIMIT 1)
            )
            WHERE item_id IN (SELECT id FROM content_items WHERE parent_item_id = ?1)
            "#,
        )
        .bind(parent_item_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            UPDATE content_items
            SET reply_to_post_id = COALESCE(
                (SELECT pp.platform_post_id FROM publications pp
                 WHERE pp.item_id = ?1 AND pp.platform = content_items.adhoc_platform
                   AND pp.status = 'published'),
                (SELECT adhoc_post_id FROM content_items ci WHERE ci.id = ?1),
                (SELECT pp.platform_post_id FROM publications pp
                 WHERE pp.item_id = ?1 AND pp.status = 'published' LIMIT 1)
            )
            WHERE parent_item_id = ?1
            "#,
        )
        .bind(parent_item_id)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_platform(raw: String) -> Result<PlatformId> {
    raw.parse()
        .map_err(|_| DbError::Decode(format!("unknown platform '{}'", raw)).into())
}

fn map_item(row: sqlx::sqlite::SqliteRow) -> Result<ContentItem> {
    let adhoc_platform = row
        .get::<Option<String>, _>("adhoc_platform")
        .map(parse_platform)
        .transpose()?;

    Ok(ContentItem {
        id: row.get("id"),
        user_id: row.get("user_id"),
        body: row.get("body"),
        content_type: row.get("content_type"),
        status: ItemStatus::parse(&row.get::<String, _>("status")),
        scheduled_at: row.get("scheduled_at"),
        published_at: row.get("published_at"),
        is_scheduled: row.get::<i64, _>("is_scheduled") != 0,
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        last_retry_at: row.get("last_retry_at"),
        failed_at: row.get("failed_at"),
        parent_item_id: row.get("parent_item_id"),
        comment_delay_minutes: row.get("comment_delay_minutes"),
        reply_to_post_id: row.get("reply_to_post_id"),
        adhoc_account_id: row.get("adhoc_account_id"),
        adhoc_platform,
        adhoc_post_id: row.get("adhoc_post_id"),
        adhoc_post_url: row.get("adhoc_post_url"),
        options: row.get("options"),
        created_at: row.get("created_at"),
    })
}

fn map_publication(row: sqlx::sqlite::SqliteRow) -> Result<Publication> {
    Ok(Publication {
        id: row.get("id"),
        item_id: row.get("item_id"),
        account_id: row.get("account_id"),
        platform: parse_platform(row.get::<String, _>("platform"))?,
        status: PublicationStatus::parse(&row.get::<String, _>("status")),
        platform_post_id: row.get("platform_post_id"),
        platform_url: row.get("platform_url"),
        scheduled_for: row.get("scheduled_for"),
        published_at: row.get("published_at"),
        retry_count: row.get("retry_count"),
        last_retry_at: row.get("last_retry_at"),
        error_message: row.get("error_message"),
        failed_at: row.get("failed_at"),
        reply_to_post_id: row.get("reply_to_post_id"),
        like_count: row.get("like_count"),
        reply_count: row.get("reply_count"),
        view_count: row.get("view_count"),
        last_synced_at: row.get("last_synced_at"),
    })
}

fn map_account(row: sqlx::sqlite::SqliteRow) -> Result<DestinationAccount> {
    Ok(DestinationAccount {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform: parse_platform(row.get::<String, _>("platform"))?,
        handle: row.get("handle"),
        platform_user_id: row.get("platform_user_id"),
        status: AccountStatus::parse(&row.get::<String, _>("status")),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        token_expires_at: row.get("token_expires_at"),
        created_at: row.get("created_at"),
    })
}

fn map_media(row: sqlx::sqlite::SqliteRow) -> Result<MediaAttachment> {
    Ok(MediaAttachment {
        id: row.get("id"),
        item_id: row.get("item_id"),
        position: row.get("position"),
        kind: MediaKind::parse(&row.get::<String, _>("kind")),
        url: row.get("url"),
        alt_text: row.get("alt_text"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyndicateError;

    fn test_account(platform: PlatformId) -> DestinationAccount {
        DestinationAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "user-1".to_string(),
            platform,
            handle: "tester".to_string(),
            platform_user_id: "pu-123".to_string(),
            status: AccountStatus::Active,
            access_token: Some("token".to_string()),
            refresh_token: None,
            token_expires_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    fn scheduled_item(at: i64) -> ContentItem {
        let mut item = ContentItem::new("user-1".to_string(), "Hello".to_string());
        item.schedule(at);
        item
    }

    #[tokio::test]
    async fn test_open_creates_file_and_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("queue.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();
        assert!(db.get_item(&item.id).await.unwrap().is_some());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_insert_and_get_item() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();

        let loaded = db.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, item.id);
        assert_eq!(loaded.body, "Hello");
        assert_eq!(loaded.status, ItemStatus::Scheduled);
        assert!(loaded.is_scheduled);
        assert_eq!(loaded.scheduled_at, Some(100));
    }

    #[tokio::test]
    async fn test_get_nonexistent_item() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();

        assert!(db.claim_item(&item.id).await.unwrap());
        // Second claim sees the item already in publishing and no-ops.
        assert!(!db.claim_item(&item.id).await.unwrap());

        let loaded = db.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ItemStatus::Publishing);
    }

    #[tokio::test]
    async fn test_claim_skips_non_scheduled() {
        let db = Database::in_memory().await.unwrap();
        let mut item = ContentItem::new("user-1".to_string(), "Draft".to_string());
        item.status = ItemStatus::Draft;
        db.insert_item(&item).await.unwrap();

        assert!(!db.claim_item(&item.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_publication_uniqueness_per_platform() {
        let db = Database::in_memory().await.unwrap();
        let account = test_account(PlatformId::Threads);
        db.insert_account(&account).await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();

        let first = Publication::new(item.id.clone(), account.id.clone(), PlatformId::Threads);
        db.insert_publication(&first).await.unwrap();

        // Second target for the same (item, platform) pair is rejected.
        let dup = Publication::new(item.id.clone(), account.id.clone(), PlatformId::Threads);
        let result = db.insert_publication(&dup).await;
        assert!(matches!(result, Err(SyndicateError::Database(_))));

        // A different platform is fine.
        let account2 = test_account(PlatformId::Mastodon);
        db.insert_account(&account2).await.unwrap();
        let other = Publication::new(item.id.clone(), account2.id.clone(), PlatformId::Mastodon);
        db.insert_publication(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_due_ordering_and_cutoff() {
        let db = Database::in_memory().await.unwrap();
        let late = scheduled_item(200);
        let early = scheduled_item(100);
        let future = scheduled_item(1000);
        db.insert_item(&late).await.unwrap();
        db.insert_item(&early).await.unwrap();
        db.insert_item(&future).await.unwrap();

        let due = db.find_due_items(500).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, early.id);
        assert_eq!(due[1].id, late.id);
    }

    #[tokio::test]
    async fn test_find_due_gates_replies_on_parent() {
        let db = Database::in_memory().await.unwrap();
        let mut parent = scheduled_item(100);
        parent.status = ItemStatus::Publishing;
        db.insert_item(&parent).await.unwrap();

        let mut reply = scheduled_item(100);
        reply.parent_item_id = Some(parent.id.clone());
        reply.comment_delay_minutes = Some(5);
        db.insert_item(&reply).await.unwrap();

        // Parent not yet published: the reply is invisible even though due.
        let due = db.find_due_items(500).await.unwrap();
        assert!(due.iter().all(|i| i.id != reply.id));

        let mut uow = db.begin().await.unwrap();
        uow.mark_item_published(&parent.id, Some(("p-1", None)), 150)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let due = db.find_due_items(500).await.unwrap();
        assert!(due.iter().any(|i| i.id == reply.id));
    }

    #[tokio::test]
    async fn test_find_due_resumes_publishing_with_scheduled_targets() {
        let db = Database::in_memory().await.unwrap();
        let account = test_account(PlatformId::Threads);
        db.insert_account(&account).await.unwrap();

        let mut item = scheduled_item(100);
        item.status = ItemStatus::Publishing;
        db.insert_item(&item).await.unwrap();

        let publication =
            Publication::new(item.id.clone(), account.id.clone(), PlatformId::Threads);
        db.insert_publication(&publication).await.unwrap();

        let due = db.find_due_items(500).await.unwrap();
        assert!(due.iter().any(|i| i.id == item.id));
    }

    #[tokio::test]
    async fn test_find_missed_is_read_only() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();

        let missed = db.find_missed_items(10_000, 60).await.unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].id, item.id);

        // No mutation happened.
        let loaded = db.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ItemStatus::Scheduled);
        assert_eq!(loaded.retry_count, 0);
    }

    #[tokio::test]
    async fn test_find_missed_respects_threshold() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(950);
        db.insert_item(&item).await.unwrap();

        // Due but not yet past the threshold.
        let missed = db.find_missed_items(1000, 100).await.unwrap();
        assert!(missed.is_empty());

        let missed = db.find_missed_items(2000, 100).await.unwrap();
        assert_eq!(missed.len(), 1);
    }

    #[tokio::test]
    async fn test_find_stale_publishing() {
        let db = Database::in_memory().await.unwrap();
        let mut stuck = scheduled_item(100);
        stuck.status = ItemStatus::Publishing;
        db.insert_item(&stuck).await.unwrap();

        let stale = db.find_stale_publishing(10_000, 60).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, stuck.id);
    }

    #[tokio::test]
    async fn test_uow_rolls_back_without_commit() {
        let db = Database::in_memory().await.unwrap();
        let mut item = scheduled_item(100);
        item.status = ItemStatus::Publishing;
        db.insert_item(&item).await.unwrap();

        {
            let mut uow = db.begin().await.unwrap();
            uow.mark_item_failed(&item.id, "boom", 200).await.unwrap();
            // Dropped without commit.
        }

        let loaded = db.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ItemStatus::Publishing);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_uow_retry_and_terminal_paths_are_distinct() {
        let db = Database::in_memory().await.unwrap();
        let account = test_account(PlatformId::Instagram);
        db.insert_account(&account).await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();
        let publication =
            Publication::new(item.id.clone(), account.id.clone(), PlatformId::Instagram);
        db.insert_publication(&publication).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        uow.record_retryable_failure(&publication.id, "timeout", 200)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let loaded = db.get_publication(&publication.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PublicationStatus::Scheduled);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_retry_at, Some(200));
        assert!(loaded.failed_at.is_none());

        let mut uow = db.begin().await.unwrap();
        uow.record_terminal_failure(&publication.id, "rejected", 300)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let loaded = db.get_publication(&publication.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PublicationStatus::Failed);
        assert_eq!(loaded.failed_at, Some(300));
        // Terminal path does not touch the retry counter.
        assert_eq!(loaded.retry_count, 1);
    }

    #[tokio::test]
    async fn test_release_claim_for_retry() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();
        assert!(db.claim_item(&item.id).await.unwrap());

        db.release_claim_for_retry(&item.id, "commit failed", 200)
            .await
            .unwrap();

        let loaded = db.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ItemStatus::Scheduled);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_retry_at, Some(200));
    }

    #[tokio::test]
    async fn test_cascade_prefers_matching_platform() {
        let db = Database::in_memory().await.unwrap();
        let threads = test_account(PlatformId::Threads);
        let mastodon = test_account(PlatformId::Mastodon);
        db.insert_account(&threads).await.unwrap();
        db.insert_account(&mastodon).await.unwrap();

        let mut parent = scheduled_item(100);
        parent.status = ItemStatus::Publishing;
        db.insert_item(&parent).await.unwrap();

        let parent_threads =
            Publication::new(parent.id.clone(), threads.id.clone(), PlatformId::Threads);
        let parent_mastodon =
            Publication::new(parent.id.clone(), mastodon.id.clone(), PlatformId::Mastodon);
        db.insert_publication(&parent_threads).await.unwrap();
        db.insert_publication(&parent_mastodon).await.unwrap();

        let mut reply = scheduled_item(160);
        reply.parent_item_id = Some(parent.id.clone());
        db.insert_item(&reply).await.unwrap();
        let reply_threads =
            Publication::new(reply.id.clone(), threads.id.clone(), PlatformId::Threads);
        db.insert_publication(&reply_threads).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        uow.mark_publication_published(&parent_threads.id, "t-abc", Some("https://t/abc"), 150)
            .await
            .unwrap();
        uow.mark_publication_published(&parent_mastodon.id, "m-xyz", None, 150)
            .await
            .unwrap();
        uow.mark_item_published(&parent.id, None, 150).await.unwrap();
        uow.cascade_replies(&parent.id).await.unwrap();
        uow.commit().await.unwrap();

        let loaded = db.get_publication(&reply_threads.id).await.unwrap().unwrap();
        assert_eq!(loaded.reply_to_post_id.as_deref(), Some("t-abc"));
    }

    #[tokio::test]
    async fn test_resolve_parent_post_id_fallbacks() {
        let db = Database::in_memory().await.unwrap();
        let mut parent = ContentItem::new("user-1".to_string(), "Adhoc parent".to_string());
        parent.status = ItemStatus::Published;
        parent.adhoc_platform = Some(PlatformId::Threads);
        parent.adhoc_post_id = Some("adhoc-1".to_string());
        db.insert_item(&parent).await.unwrap();

        let resolved = db
            .resolve_parent_post_id(&parent.id, PlatformId::Threads)
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("adhoc-1"));
    }

    #[tokio::test]
    async fn test_media_listed_in_carousel_order() {
        let db = Database::in_memory().await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();

        for (pos, url) in [(2, "c.jpg"), (0, "a.jpg"), (1, "b.jpg")] {
            let media = MediaAttachment::new(
                item.id.clone(),
                pos,
                MediaKind::Image,
                format!("https://cdn.example/{}", url),
            );
            db.insert_media(&media).await.unwrap();
        }

        let media = db.list_media(&item.id).await.unwrap();
        assert_eq!(media.len(), 3);
        assert!(media[0].url.ends_with("a.jpg"));
        assert!(media[2].url.ends_with("c.jpg"));
    }

    #[tokio::test]
    async fn test_cascade_delete_removes_children() {
        let db = Database::in_memory().await.unwrap();
        let account = test_account(PlatformId::Threads);
        db.insert_account(&account).await.unwrap();
        let item = scheduled_item(100);
        db.insert_item(&item).await.unwrap();
        let publication =
            Publication::new(item.id.clone(), account.id.clone(), PlatformId::Threads);
        db.insert_publication(&publication).await.unwrap();

        sqlx::query("DELETE FROM content_items WHERE id = ?")
            .bind(&item.id)
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(db.get_publication(&publication.id).await.unwrap().is_none());
        // The account is merely referenced and survives.
        assert!(db.get_account(&account.id).await.unwrap().is_some());
    }
}
