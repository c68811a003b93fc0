//! Due-item discovery
//!
//! Turns the raw due query into fully-loaded [`DueItem`] working sets
//! (publications, destination accounts, ordered media) and applies the
//! retry backoff schedule, which lives in Rust rather than SQL.

use std::collections::HashMap;

use tracing::warn;

use crate::config::PublisherConfig;
use crate::db::Database;
use crate::error::Result;
use crate::types::{ContentItem, DestinationAccount, ItemStatus, MediaAttachment, Publication};

/// One due item with everything a pass needs to dispatch it.
pub struct DueItem {
    pub item: ContentItem,
    /// All targets of the item, not just the eligible ones; the
    /// aggregate decision needs the full set.
    pub publications: Vec<Publication>,
    pub accounts: HashMap<String, DestinationAccount>,
    pub media: Vec<MediaAttachment>,
}

pub struct Scheduler {
    db: Database,
    config: PublisherConfig,
}

impl Scheduler {
    pub fn new(db: Database, config: PublisherConfig) -> Self {
        Self { db, config }
    }

    /// Whether a previously-failed attempt has served its backoff.
    /// `retry_count` failures so far means the next retry waits for
    /// schedule entry `retry_count - 1`.
    pub fn backoff_elapsed(&self, retry_count: i64, last_retry_at: Option<i64>, now: i64) -> bool {
        if retry_count == 0 {
            return true;
        }
        match last_retry_at {
            Some(at) => at + self.config.backoff_secs(retry_count - 1) <= now,
            None => true,
        }
    }

    /// A publication the current pass may dispatch: still scheduled and
    /// past its backoff window.
    pub fn target_eligible(&self, publication: &Publication, now: i64) -> bool {
        publication.status == crate::types::PublicationStatus::Scheduled
            && self.backoff_elapsed(publication.retry_count, publication.last_retry_at, now)
    }

    /// Everything due at `now`, oldest-first, with eager-loaded working
    /// sets. Items still serving an item-level backoff, and items
    /// carrying only targets inside their backoff windows, are left for
    /// a later pass.
    pub async fn find_due(&self, now: i64) -> Result<Vec<DueItem>> {
        let candidates = self.db.find_due_items(now).await?;
        let mut due = Vec::with_capacity(candidates.len());

        for item in candidates {
            if item.status == ItemStatus::Scheduled
                && !self.backoff_elapsed(item.retry_count, item.last_retry_at, now)
            {
                continue;
            }

            let publications = self.db.list_publications(&item.id).await?;

            if item.status != ItemStatus::Scheduled
                && !publications.iter().any(|p| self.target_eligible(p, now))
            {
                continue;
            }

            let mut accounts = HashMap::new();
            let mut account_ids: Vec<&String> =
                publications.iter().map(|p| &p.account_id).collect();
            if let Some(adhoc) = &item.adhoc_account_id {
                account_ids.push(adhoc);
            }
            for account_id in account_ids {
                if accounts.contains_key(account_id) {
                    continue;
                }
                match self.db.get_account(account_id).await? {
                    Some(account) => {
                        accounts.insert(account_id.clone(), account);
                    }
                    None => {
                        warn!(item_id = %item.id, account_id = %account_id,
                              "destination account missing, target will fail");
                    }
                }
            }

            let media = self.db.list_media(&item.id).await?;

            due.push(DueItem {
                item,
                publications,
                accounts,
                media,
            });
        }

        Ok(due)
    }

    /// Read-only diagnostic: scheduled items that slipped past the
    /// configured staleness threshold without being picked up.
    pub async fn find_missed(&self, now: i64) -> Result<Vec<ContentItem>> {
        self.db
            .find_missed_items(now, self.config.missed_threshold_minutes * 60)
            .await
    }

    /// Read-only diagnostic: items stuck in `publishing` with nothing
    /// left to retry, usually a crashed pass.
    pub async fn find_stale_publishing(&self, now: i64) -> Result<Vec<ContentItem>> {
        self.db
            .find_stale_publishing(now, self.config.missed_threshold_minutes * 60)
            .await
    }
}
