//! Scripted strategy for tests
//!
//! Behaves like a real strategy but follows a queue of scripted
//! outcomes and records every request it sees. When the script runs
//! out it keeps succeeding with generated post ids.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CredentialError, PlatformError, Result};
use crate::types::PlatformId;

use super::{PublishReceipt, PublishRequest, Strategy};

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success { post_id: String, url: Option<String> },
    Platform(PlatformError),
    Credential(CredentialError),
    /// Never completes within any reasonable window; for timeout tests.
    Hang,
}

/// One observed dispatch, captured for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub body: String,
    pub media_count: usize,
    pub reply_to_id: Option<String>,
    pub account_id: String,
}

#[derive(Debug)]
pub struct MockStrategy {
    platform: PlatformId,
    script: Mutex<VecDeque<MockOutcome>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    call_count: AtomicU64,
}

impl MockStrategy {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            call_count: AtomicU64::new(0),
        }
    }

    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        self.push_outcome(outcome);
        self
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                body: request.body.to_string(),
                media_count: request.media.len(),
                reply_to_id: request.options.reply_to_id.clone(),
                account_id: request.credential.account_id.clone(),
            });
        }

        let outcome = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());

        match outcome {
            None => Ok(PublishReceipt {
                post_id: format!("{}-post-{}", self.platform, count),
                url: None,
            }),
            Some(MockOutcome::Success { post_id, url }) => Ok(PublishReceipt { post_id, url }),
            Some(MockOutcome::Platform(err)) => Err(err.into()),
            Some(MockOutcome::Credential(err)) => Err(err.into()),
            Some(MockOutcome::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("mock hang completed")
            }
        }
    }
}
