//! Integration tests for the publishing engine
//!
//! Exercises whole passes end to end: claim semantics, fan-out
//! aggregation, retry backoff and ceiling, and the delayed reply
//! cascade, with scripted strategies standing in for the platforms.

use std::sync::Arc;

use libsyndicate::platforms::mock::{MockOutcome, MockStrategy};
use libsyndicate::{
    ContentItem, Credential, Database, DestinationAccount, ItemStatus, Orchestrator, OutcomeKind,
    PlatformError, PlatformId, Publication, PublicationStatus, PublisherConfig, StrategyRegistry,
};
use libsyndicate::credentials::StaticCredentialProvider;
use libsyndicate::types::AccountStatus;

struct Harness {
    db: Database,
    threads: Arc<MockStrategy>,
    instagram: Arc<MockStrategy>,
    mastodon: Arc<MockStrategy>,
    accounts: std::collections::HashMap<PlatformId, DestinationAccount>,
    orchestrator: Orchestrator,
}

async fn setup(config: PublisherConfig) -> Harness {
    let db = Database::in_memory().await.unwrap();

    let threads = Arc::new(MockStrategy::new(PlatformId::Threads));
    let instagram = Arc::new(MockStrategy::new(PlatformId::Instagram));
    let mastodon = Arc::new(MockStrategy::new(PlatformId::Mastodon));

    let mut registry = StrategyRegistry::new();
    registry.register(threads.clone()).unwrap();
    registry.register(instagram.clone()).unwrap();
    registry.register(mastodon.clone()).unwrap();

    let mut provider = StaticCredentialProvider::new();
    let mut accounts = std::collections::HashMap::new();
    for platform in PlatformId::ALL {
        let account = DestinationAccount {
            id: format!("acct-{}", platform),
            user_id: "user-1".to_string(),
            platform,
            handle: format!("tester@{}", platform),
            platform_user_id: format!("pu-{}", platform),
            status: AccountStatus::Active,
            access_token: Some("tok".to_string()),
            refresh_token: None,
            token_expires_at: None,
            created_at: 0,
        };
        db.insert_account(&account).await.unwrap();
        provider = provider.with_credential(Credential {
            account_id: account.id.clone(),
            platform,
            platform_user_id: account.platform_user_id.clone(),
            access_token: "tok".to_string(),
        });
        accounts.insert(platform, account);
    }

    let orchestrator = Orchestrator::new(
        db.clone(),
        Arc::new(registry),
        Arc::new(provider),
        config,
    );

    Harness {
        db,
        threads,
        instagram,
        mastodon,
        accounts,
        orchestrator,
    }
}

async fn scheduled_item(h: &Harness, at: i64, platforms: &[PlatformId]) -> ContentItem {
    let mut item = ContentItem::new("user-1".to_string(), "Hello world".to_string());
    item.schedule(at);
    h.db.insert_item(&item).await.unwrap();
    for &platform in platforms {
        let publication = Publication::new(
            item.id.clone(),
            h.accounts[&platform].id.clone(),
            platform,
        );
        h.db.insert_publication(&publication).await.unwrap();
    }
    item
}

// The reference scenario: two fresh targets, one succeeds with id
// "abc", one times out transiently. The success is enough to publish
// the item; the failed target keeps its retry eligibility.
#[tokio::test]
async fn test_partial_success_publishes_item() {
    let h = setup(PublisherConfig::default()).await;
    let item = scheduled_item(&h, 940, &[PlatformId::Threads, PlatformId::Mastodon]).await;

    h.threads.push_outcome(MockOutcome::Success {
        post_id: "abc".to_string(),
        url: Some("https://a/abc".to_string()),
    });
    h.mastodon.push_outcome(MockOutcome::Platform(PlatformError::Timeout(
        "deadline".to_string(),
    )));

    let outcomes = h.orchestrator.run_at(1_000).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, OutcomeKind::Published);
    assert_eq!(outcomes[0].published_targets, 1);
    assert_eq!(outcomes[0].pending_targets, 1);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Published);
    assert_eq!(loaded.published_at, Some(1_000));

    let publications = h.db.list_publications(&item.id).await.unwrap();
    let threads_pub = publications
        .iter()
        .find(|p| p.platform == PlatformId::Threads)
        .unwrap();
    assert_eq!(threads_pub.status, PublicationStatus::Published);
    assert_eq!(threads_pub.platform_post_id.as_deref(), Some("abc"));
    assert_eq!(threads_pub.platform_url.as_deref(), Some("https://a/abc"));

    let mastodon_pub = publications
        .iter()
        .find(|p| p.platform == PlatformId::Mastodon)
        .unwrap();
    assert_eq!(mastodon_pub.status, PublicationStatus::Scheduled);
    assert_eq!(mastodon_pub.retry_count, 1);
    assert_eq!(mastodon_pub.last_retry_at, Some(1_000));
    assert!(mastodon_pub.error_message.is_some());
}

// The failed target from a published item retries on a later pass and
// the first published_at is preserved.
#[tokio::test]
async fn test_retry_continues_after_aggregate_success() {
    let h = setup(PublisherConfig::default()).await;
    let item = scheduled_item(&h, 940, &[PlatformId::Threads, PlatformId::Mastodon]).await;

    h.mastodon.push_outcome(MockOutcome::Platform(PlatformError::Unavailable(
        "503".to_string(),
    )));

    h.orchestrator.run_at(1_000).await.unwrap();

    // Inside the 60s backoff window nothing happens.
    let outcomes = h.orchestrator.run_at(1_030).await.unwrap();
    assert!(outcomes.is_empty());

    let outcomes = h.orchestrator.run_at(1_100).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, OutcomeKind::Published);
    assert_eq!(outcomes[0].published_targets, 2);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Published);
    assert_eq!(loaded.published_at, Some(1_000));
    assert_eq!(h.mastodon.call_count(), 2);
}

#[tokio::test]
async fn test_all_targets_failing_fails_item() {
    let h = setup(PublisherConfig::default()).await;
    let item = scheduled_item(&h, 940, &[PlatformId::Threads, PlatformId::Instagram]).await;

    h.threads.push_outcome(MockOutcome::Platform(PlatformError::Rejected(
        "body too long".to_string(),
    )));
    h.instagram.push_outcome(MockOutcome::Platform(PlatformError::InvalidMedia(
        "unsupported format".to_string(),
    )));

    let outcomes = h.orchestrator.run_at(1_000).await.unwrap();
    assert_eq!(outcomes[0].kind, OutcomeKind::Failed);
    assert_eq!(outcomes[0].failed_targets, 2);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Failed);
    assert_eq!(loaded.failed_at, Some(1_000));
    assert!(loaded.error_message.is_some());

    for publication in h.db.list_publications(&item.id).await.unwrap() {
        assert_eq!(publication.status, PublicationStatus::Failed);
        assert!(publication.error_message.is_some());
    }
}

// A target the pass could not attempt (still inside its backoff) holds
// the item in publishing even when another target succeeds.
#[tokio::test]
async fn test_unattempted_target_holds_item_open() {
    let h = setup(PublisherConfig::default()).await;

    let mut item = ContentItem::new("user-1".to_string(), "Hello world".to_string());
    item.schedule(940);
    h.db.insert_item(&item).await.unwrap();

    let fresh = Publication::new(
        item.id.clone(),
        h.accounts[&PlatformId::Threads].id.clone(),
        PlatformId::Threads,
    );
    h.db.insert_publication(&fresh).await.unwrap();

    let mut backing_off = Publication::new(
        item.id.clone(),
        h.accounts[&PlatformId::Mastodon].id.clone(),
        PlatformId::Mastodon,
    );
    backing_off.retry_count = 1;
    backing_off.last_retry_at = Some(990);
    h.db.insert_publication(&backing_off).await.unwrap();

    let outcomes = h.orchestrator.run_at(1_000).await.unwrap();
    assert_eq!(outcomes[0].kind, OutcomeKind::StillPublishing);
    assert_eq!(outcomes[0].published_targets, 1);
    assert_eq!(outcomes[0].pending_targets, 1);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Publishing);

    // Once the backoff elapses the remaining target completes the item.
    let outcomes = h.orchestrator.run_at(1_100).await.unwrap();
    assert_eq!(outcomes[0].kind, OutcomeKind::Published);
    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Published);
}

// Two concurrent passes over the same item produce exactly one
// dispatch; the loser of the claim race observes a no-op.
#[tokio::test]
async fn test_concurrent_passes_claim_once() {
    let h = setup(PublisherConfig::default()).await;

    let mut item = ContentItem::new("user-1".to_string(), "Once only".to_string());
    item.schedule(940);
    item.adhoc_platform = Some(PlatformId::Threads);
    item.adhoc_account_id = Some(h.accounts[&PlatformId::Threads].id.clone());
    h.db.insert_item(&item).await.unwrap();

    let (a, b) = tokio::join!(h.orchestrator.run_at(1_000), h.orchestrator.run_at(1_000));
    let outcomes: Vec<_> = a.unwrap().into_iter().chain(b.unwrap()).collect();

    let published = outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::Published)
        .count();
    assert_eq!(published, 1);
    assert!(outcomes
        .iter()
        .all(|o| o.kind == OutcomeKind::Published || o.kind == OutcomeKind::Skipped));
    assert_eq!(h.threads.call_count(), 1);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Published);
}

// After max_retries transient failures the next failure is terminal
// even though it is itself transient.
#[tokio::test]
async fn test_retry_ceiling_forces_terminal() {
    let config = PublisherConfig {
        max_retries: 2,
        retry_backoff_secs: vec![0],
        ..Default::default()
    };
    let h = setup(config).await;
    let item = scheduled_item(&h, 940, &[PlatformId::Threads]).await;

    for _ in 0..3 {
        h.threads.push_outcome(MockOutcome::Platform(PlatformError::RateLimited(
            "slow down".to_string(),
        )));
    }

    h.orchestrator.run_at(1_000).await.unwrap();
    h.orchestrator.run_at(1_001).await.unwrap();
    let outcomes = h.orchestrator.run_at(1_002).await.unwrap();

    assert_eq!(outcomes[0].kind, OutcomeKind::Failed);
    assert_eq!(h.threads.call_count(), 3);

    let publication = &h.db.list_publications(&item.id).await.unwrap()[0];
    assert_eq!(publication.status, PublicationStatus::Failed);
    assert_eq!(publication.retry_count, 2);
    assert_eq!(publication.failed_at, Some(1_002));

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Failed);

    // Nothing left to do on later passes.
    assert!(h.orchestrator.run_at(1_003).await.unwrap().is_empty());
}

// A reply never dispatches before its parent is published, then
// anchors on the parent's post id for its own platform.
#[tokio::test]
async fn test_reply_cascade() {
    let h = setup(PublisherConfig::default()).await;
    let parent = scheduled_item(&h, 940, &[PlatformId::Threads, PlatformId::Mastodon]).await;

    let mut reply = ContentItem::new("user-1".to_string(), "Follow-up".to_string());
    reply.schedule(900); // due before the parent
    reply.parent_item_id = Some(parent.id.clone());
    reply.comment_delay_minutes = Some(1);
    h.db.insert_item(&reply).await.unwrap();
    let reply_pub = Publication::new(
        reply.id.clone(),
        h.accounts[&PlatformId::Threads].id.clone(),
        PlatformId::Threads,
    );
    h.db.insert_publication(&reply_pub).await.unwrap();

    h.threads.push_outcome(MockOutcome::Success {
        post_id: "abc".to_string(),
        url: None,
    });
    // Keep one parent target retrying so later passes revisit the parent.
    h.mastodon.push_outcome(MockOutcome::Platform(PlatformError::Unavailable(
        "503".to_string(),
    )));

    let outcomes = h.orchestrator.run_at(950).await.unwrap();
    // Only the parent is visible; the reply stays gated.
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].item_id, parent.id);

    let loaded_reply = h.db.get_item(&reply.id).await.unwrap().unwrap();
    assert_eq!(loaded_reply.status, ItemStatus::Scheduled);

    // Parent published on the first pass (one success suffices), so the
    // reply becomes eligible with "abc" as its anchor.
    let outcomes = h.orchestrator.run_at(1_100).await.unwrap();
    assert!(outcomes.iter().any(|o| o.item_id == reply.id));

    let dispatched = h.threads.requests();
    let reply_request = dispatched.last().unwrap();
    assert_eq!(reply_request.body, "Follow-up");
    assert_eq!(reply_request.reply_to_id.as_deref(), Some("abc"));

    let loaded_reply = h.db.get_item(&reply.id).await.unwrap().unwrap();
    assert_eq!(loaded_reply.status, ItemStatus::Published);
    let loaded_pub = h.db.get_publication(&reply_pub.id).await.unwrap().unwrap();
    assert_eq!(loaded_pub.reply_to_post_id.as_deref(), Some("abc"));
}

// The per-call timeout turns a hung strategy into a transient failure
// instead of stalling the pass.
#[tokio::test]
async fn test_hung_strategy_times_out_transiently() {
    let config = PublisherConfig {
        publish_timeout_secs: 0,
        ..Default::default()
    };
    let h = setup(config).await;
    let item = scheduled_item(&h, 940, &[PlatformId::Instagram]).await;

    h.instagram.push_outcome(MockOutcome::Hang);

    let outcomes = h.orchestrator.run_at(1_000).await.unwrap();
    assert_eq!(outcomes[0].kind, OutcomeKind::StillPublishing);

    let publication = &h.db.list_publications(&item.id).await.unwrap()[0];
    assert_eq!(publication.status, PublicationStatus::Scheduled);
    assert_eq!(publication.retry_count, 1);
}

// Missed-item reporting observes without mutating, including items a
// crashed pass left in publishing.
#[tokio::test]
async fn test_missed_reporting_is_read_only() {
    let h = setup(PublisherConfig::default()).await;
    let mut item = ContentItem::new("user-1".to_string(), "Forgotten".to_string());
    item.schedule(100);
    h.db.insert_item(&item).await.unwrap();

    let now = 100 + 31 * 60;
    let missed = h.orchestrator.scheduler().find_missed(now).await.unwrap();
    assert_eq!(missed.len(), 1);

    let loaded = h.db.get_item(&item.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ItemStatus::Scheduled);
    assert_eq!(loaded.retry_count, 0);
    assert!(loaded.error_message.is_none());
}
