//! Publishing orchestrator
//!
//! One pass: discover due items, claim each one atomically, fan out to
//! the platform strategies, classify failures, persist every target
//! outcome and the aggregate item status in a single unit of work, and
//! resolve reply anchors for any scheduled replies of a freshly
//! published parent.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::credentials::CredentialProvider;
use crate::db::Database;
use crate::error::{PlatformError, Result, SyndicateError};
use crate::platforms::{PublishReceipt, PublishRequest, StrategyRegistry};
use crate::scheduler::{DueItem, Scheduler};
use crate::types::{ItemStatus, PlatformId, PlatformOptions, PublicationStatus};

/// How one item left a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Published,
    Failed,
    /// No target has succeeded yet and at least one is still pending,
    /// or targets the pass never reached are outstanding.
    StillPublishing,
    /// Another pass claimed the item first.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: String,
    pub kind: OutcomeKind,
    pub published_targets: usize,
    pub failed_targets: usize,
    pub pending_targets: usize,
}

struct TargetAttempt {
    publication_id: String,
    platform: PlatformId,
    retry_count: i64,
    result: Result<PublishReceipt>,
}

pub struct Orchestrator {
    db: Database,
    scheduler: Scheduler,
    registry: Arc<StrategyRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    config: PublisherConfig,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        registry: Arc<StrategyRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        config: PublisherConfig,
    ) -> Self {
        let scheduler = Scheduler::new(db.clone(), config.clone());
        Self {
            db,
            scheduler,
            registry,
            credentials,
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run one pass at the wall clock.
    pub async fn run_once(&self) -> Result<Vec<ItemOutcome>> {
        self.run_at(chrono::Utc::now().timestamp()).await
    }

    /// Run one pass at an explicit instant. Items are processed
    /// oldest-first; a registry gap for any required platform aborts
    /// the pass before anything is claimed.
    pub async fn run_at(&self, now: i64) -> Result<Vec<ItemOutcome>> {
        let due = self.scheduler.find_due(now).await?;
        if due.is_empty() {
            debug!("no items due");
            return Ok(Vec::new());
        }

        self.precheck_registry(&due)?;
        info!(count = due.len(), "processing due items");

        let mut outcomes = Vec::with_capacity(due.len());
        for due_item in &due {
            let outcome = self.process_item(due_item, now).await?;
            info!(
                item_id = %outcome.item_id,
                kind = ?outcome.kind,
                published = outcome.published_targets,
                failed = outcome.failed_targets,
                pending = outcome.pending_targets,
                "item processed"
            );
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Every platform the pass will dispatch to must have a strategy
    /// before any item is touched.
    fn precheck_registry(&self, due: &[DueItem]) -> Result<()> {
        let mut platforms = BTreeSet::new();
        for due_item in due {
            for publication in &due_item.publications {
                if publication.status == PublicationStatus::Scheduled {
                    platforms.insert(publication.platform.as_str());
                }
            }
            if due_item.publications.is_empty() {
                if let Some(platform) = due_item.item.adhoc_platform {
                    platforms.insert(platform.as_str());
                }
            }
        }
        for platform in platforms {
            // as_str round-trips; the parse cannot fail here.
            if let Ok(id) = platform.parse::<PlatformId>() {
                self.registry.get(id)?;
            }
        }
        Ok(())
    }

    async fn process_item(&self, due: &DueItem, now: i64) -> Result<ItemOutcome> {
        let item = &due.item;

        if item.status == ItemStatus::Scheduled && !self.db.claim_item(&item.id).await? {
            debug!(item_id = %item.id, "claim lost to a concurrent pass");
            return Ok(ItemOutcome {
                item_id: item.id.clone(),
                kind: OutcomeKind::Skipped,
                published_targets: 0,
                failed_targets: 0,
                pending_targets: 0,
            });
        }

        let options = match item.platform_options() {
            Ok(options) => options,
            Err(err) => {
                // Malformed options are permanent; fail the item and
                // any scheduled targets in one transaction.
                let message = err.to_string();
                let mut uow = self.db.begin().await?;
                for publication in &due.publications {
                    if publication.status == PublicationStatus::Scheduled {
                        uow.record_terminal_failure(&publication.id, &message, now)
                            .await?;
                    }
                }
                uow.mark_item_failed(&item.id, &message, now).await?;
                uow.commit().await?;
                return Ok(ItemOutcome {
                    item_id: item.id.clone(),
                    kind: OutcomeKind::Failed,
                    published_targets: 0,
                    failed_targets: due.publications.len(),
                    pending_targets: 0,
                });
            }
        };

        if due.publications.is_empty() {
            self.process_implicit(due, options, now).await
        } else {
            self.process_explicit(due, options, now).await
        }
    }

    /// Explicit targets: claim each eligible publication, fan out
    /// concurrently, then persist target outcomes and the aggregate.
    async fn process_explicit(
        &self,
        due: &DueItem,
        options: PlatformOptions,
        now: i64,
    ) -> Result<ItemOutcome> {
        let item = &due.item;

        let mut claimed = Vec::new();
        for publication in &due.publications {
            if !self.scheduler.target_eligible(publication, now) {
                continue;
            }
            if self.db.claim_publication(&publication.id).await? {
                claimed.push(publication);
            } else {
                debug!(publication_id = %publication.id, "target claim lost");
            }
        }

        let attempts = join_all(
            claimed
                .iter()
                .map(|publication| self.attempt_target(due, publication, &options)),
        )
        .await;

        let mut published = due
            .publications
            .iter()
            .filter(|p| p.status == PublicationStatus::Published)
            .count();
        let mut failed = due
            .publications
            .iter()
            .filter(|p| p.status == PublicationStatus::Failed)
            .count();
        // Targets this pass never reached (inside backoff, or the
        // claim was lost): their outcome is unknown, so they hold the
        // item open. Attempted targets that fail transiently do not.
        let unattempted = due
            .publications
            .iter()
            .filter(|p| p.status == PublicationStatus::Scheduled)
            .count()
            - claimed.len();
        let mut pending = unattempted;

        let mut uow = self.db.begin().await?;
        let mut last_error = None;

        for attempt in &attempts {
            match &attempt.result {
                Ok(receipt) => {
                    uow.mark_publication_published(
                        &attempt.publication_id,
                        &receipt.post_id,
                        receipt.url.as_deref(),
                        now,
                    )
                    .await?;
                    published += 1;
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(
                        publication_id = %attempt.publication_id,
                        platform = %attempt.platform,
                        transient = err.is_transient(),
                        error = %message,
                        "target failed"
                    );
                    if err.is_transient() && attempt.retry_count < self.config.max_retries {
                        uow.record_retryable_failure(&attempt.publication_id, &message, now)
                            .await?;
                        pending += 1;
                    } else {
                        uow.record_terminal_failure(&attempt.publication_id, &message, now)
                            .await?;
                        failed += 1;
                    }
                    last_error = Some(message);
                }
            }
        }

        // Aggregate rule: one success is enough to call the item
        // published; targets still awaiting a retry keep retrying
        // against the published item. Only unattempted targets (and a
        // pass with no success yet) hold the item in publishing.
        let kind = if published > 0 && unattempted == 0 {
            uow.mark_item_published(&item.id, None, now).await?;
            uow.cascade_replies(&item.id).await?;
            OutcomeKind::Published
        } else if pending > 0 {
            OutcomeKind::StillPublishing
        } else {
            let message = last_error.unwrap_or_else(|| "all targets failed".to_string());
            uow.mark_item_failed(&item.id, &message, now).await?;
            OutcomeKind::Failed
        };

        if let Err(err) = uow.commit().await {
            warn!(item_id = %item.id, error = %err, "commit failed, releasing claim");
            self.db
                .release_claim_for_retry(&item.id, &err.to_string(), now)
                .await?;
            return Err(err);
        }

        Ok(ItemOutcome {
            item_id: item.id.clone(),
            kind,
            published_targets: published,
            failed_targets: failed,
            pending_targets: pending,
        })
    }

    /// Implicit single destination stored on the item itself: the item
    /// doubles as the target, so retry bookkeeping lives on it too.
    async fn process_implicit(
        &self,
        due: &DueItem,
        options: PlatformOptions,
        now: i64,
    ) -> Result<ItemOutcome> {
        let item = &due.item;

        let resolved = match (item.adhoc_platform, item.adhoc_account_id.as_deref()) {
            (Some(platform), Some(account_id)) => Ok((platform, account_id)),
            _ => Err(SyndicateError::InvalidInput(format!(
                "item {} has no publication targets and no adhoc destination",
                item.id
            ))),
        };

        let result = match resolved {
            Ok((platform, account_id)) => {
                self.dispatch(due, platform, account_id, None, &options)
                    .await
            }
            Err(err) => Err(err),
        };

        let mut uow = self.db.begin().await?;
        let (kind, published, failed, pending) = match &result {
            Ok(receipt) => {
                uow.mark_item_published(
                    &item.id,
                    Some((receipt.post_id.as_str(), receipt.url.as_deref())),
                    now,
                )
                .await?;
                uow.cascade_replies(&item.id).await?;
                (OutcomeKind::Published, 1, 0, 0)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(item_id = %item.id, transient = err.is_transient(), error = %message,
                      "adhoc dispatch failed");
                if err.is_transient() && item.retry_count < self.config.max_retries {
                    uow.record_item_retryable_failure(&item.id, &message, now)
                        .await?;
                    (OutcomeKind::StillPublishing, 0, 0, 1)
                } else {
                    uow.mark_item_failed(&item.id, &message, now).await?;
                    (OutcomeKind::Failed, 0, 1, 0)
                }
            }
        };

        if let Err(err) = uow.commit().await {
            warn!(item_id = %item.id, error = %err, "commit failed, releasing claim");
            self.db
                .release_claim_for_retry(&item.id, &err.to_string(), now)
                .await?;
            return Err(err);
        }

        Ok(ItemOutcome {
            item_id: item.id.clone(),
            kind,
            published_targets: published,
            failed_targets: failed,
            pending_targets: pending,
        })
    }

    async fn attempt_target(
        &self,
        due: &DueItem,
        publication: &crate::types::Publication,
        options: &PlatformOptions,
    ) -> TargetAttempt {
        let result = self
            .dispatch(
                due,
                publication.platform,
                &publication.account_id,
                publication.reply_to_post_id.as_deref(),
                options,
            )
            .await;

        TargetAttempt {
            publication_id: publication.id.clone(),
            platform: publication.platform,
            retry_count: publication.retry_count,
            result,
        }
    }

    /// One strategy call: resolve the credential and reply anchor,
    /// then publish under the per-call timeout.
    async fn dispatch(
        &self,
        due: &DueItem,
        platform: PlatformId,
        account_id: &str,
        stored_reply_anchor: Option<&str>,
        options: &PlatformOptions,
    ) -> Result<PublishReceipt> {
        let item = &due.item;
        let strategy = self.registry.get(platform)?;
        let credential = self.credentials.resolve(account_id).await?;

        let mut options = options.clone();
        if item.is_reply() {
            let anchor = match stored_reply_anchor.or(item.reply_to_post_id.as_deref()) {
                Some(anchor) => Some(anchor.to_string()),
                None => {
                    // Cascade data missing; resolve from the parent directly.
                    let parent_id = item.parent_item_id.as_deref().unwrap_or_default();
                    self.db.resolve_parent_post_id(parent_id, platform).await?
                }
            };
            match anchor {
                Some(anchor) => options.reply_to_id = Some(anchor),
                None => {
                    return Err(SyndicateError::InvalidInput(format!(
                        "reply {} has no resolvable parent post id",
                        item.id
                    )))
                }
            }
        }

        let request = PublishRequest {
            body: &item.body,
            media: &due.media,
            options: &options,
            credential: &credential,
        };

        let window = Duration::from_secs(self.config.publish_timeout_secs);
        match tokio::time::timeout(window, strategy.publish(&request)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(format!(
                "no response within {}s",
                self.config.publish_timeout_secs
            ))
            .into()),
        }
    }
}
