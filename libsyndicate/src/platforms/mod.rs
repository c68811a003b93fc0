//! Platform strategy layer
//!
//! One [`Strategy`] per destination network. Strategies receive a
//! fully-resolved [`PublishRequest`] and either return a
//! [`PublishReceipt`] or an error the orchestrator can classify as
//! transient or permanent. They never touch the database.

use async_trait::async_trait;

use crate::credentials::Credential;
use crate::error::{CredentialError, PlatformError, Result, SyndicateError};
use crate::types::{MediaAttachment, PlatformId, PlatformOptions};

pub mod instagram;
pub mod mastodon;
pub mod mock;
pub mod registry;
pub mod threads;

pub use instagram::InstagramStrategy;
pub use mastodon::MastodonStrategy;
pub use mock::MockStrategy;
pub use registry::StrategyRegistry;
pub use threads::ThreadsStrategy;

/// Everything a strategy needs for one dispatch. Borrowed from the
/// orchestrator's working set; strategies copy out what they keep.
pub struct PublishRequest<'a> {
    pub body: &'a str,
    pub media: &'a [MediaAttachment],
    pub options: &'a PlatformOptions,
    pub credential: &'a Credential,
}

/// What a successful dispatch came back with.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Platform-assigned post identifier, later used as a reply anchor.
    pub post_id: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn platform(&self) -> PlatformId;

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt>;
}

/// Map an HTTP response status to the error taxonomy. Auth statuses
/// become provider-side credential errors (retryable); rate limits and
/// server errors are transient; everything else is a rejection.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> SyndicateError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        PlatformError::RateLimited(truncate(body, 200).to_string()).into()
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT {
        PlatformError::Timeout(status.to_string()).into()
    } else if status.is_server_error() {
        PlatformError::Unavailable(format!("{}: {}", status, truncate(body, 200))).into()
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        CredentialError::Provider(format!("{}: {}", status, truncate(body, 200))).into()
    } else {
        PlatformError::Rejected(format!("{}: {}", status, truncate(body, 200))).into()
    }
}

/// Map a transport-level send failure.
pub(crate) fn classify_send_error(err: reqwest::Error) -> SyndicateError {
    if err.is_timeout() {
        PlatformError::Timeout(err.to_string()).into()
    } else {
        PlatformError::Unavailable(err.to_string()).into()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
