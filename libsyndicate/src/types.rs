//! Core types for Syndicate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ConfigError;

/// Closed set of destination platforms.
///
/// The set is fixed at compile time; an unrecognized identifier in
/// config or storage is a configuration error, never a per-item one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Threads,
    Instagram,
    Mastodon,
}

impl PlatformId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Threads => "threads",
            PlatformId::Instagram => "instagram",
            PlatformId::Mastodon => "mastodon",
        }
    }

    pub const ALL: [PlatformId; 3] = [
        PlatformId::Threads,
        PlatformId::Instagram,
        PlatformId::Mastodon,
    ];
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "threads" => Ok(PlatformId::Threads),
            "instagram" => Ok(PlatformId::Instagram),
            "mastodon" => Ok(PlatformId::Mastodon),
            other => Err(ConfigError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Lifecycle of a content item.
///
/// `Publishing` is transient: the orchestrator claims into it and must
/// resolve it (or a stale-lease query must flag it) within a pass.
/// `Published`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Scheduled => "scheduled",
            ItemStatus::Publishing => "publishing",
            ItemStatus::Published => "published",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "draft" => ItemStatus::Draft,
            "publishing" => ItemStatus::Publishing,
            "published" => ItemStatus::Published,
            "failed" => ItemStatus::Failed,
            "cancelled" => ItemStatus::Cancelled,
            _ => ItemStatus::Scheduled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Published | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

/// Lifecycle of a single publication target, same shape as the item's
/// but scoped to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Scheduled => "scheduled",
            PublicationStatus::Publishing => "publishing",
            PublicationStatus::Published => "published",
            PublicationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "publishing" => PublicationStatus::Publishing,
            "published" => PublicationStatus::Published,
            "failed" => PublicationStatus::Failed,
            _ => PublicationStatus::Scheduled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublicationStatus::Published | PublicationStatus::Failed
        )
    }
}

/// Health of a linked destination account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
    Error,
    Pending,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
            AccountStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => AccountStatus::Active,
            "expired" => AccountStatus::Expired,
            "revoked" => AccountStatus::Revoked,
            "error" => AccountStatus::Error,
            _ => AccountStatus::Pending,
        }
    }
}

/// The user-authored unit scheduled for delivery.
///
/// Created by the authoring flow; once `Scheduled`, mutated exclusively
/// by the orchestrator. A non-null `parent_item_id` marks a scheduled
/// reply: it targets the same destinations as its parent and only
/// becomes dispatchable after the parent publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub content_type: String,
    pub status: ItemStatus,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub is_scheduled: bool,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub last_retry_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub parent_item_id: Option<String>,
    pub comment_delay_minutes: Option<i64>,
    /// Parent's platform post id, resolved by the cascade step.
    pub reply_to_post_id: Option<String>,
    /// Implicit single destination, used when no publication rows exist.
    pub adhoc_account_id: Option<String>,
    pub adhoc_platform: Option<PlatformId>,
    pub adhoc_post_id: Option<String>,
    pub adhoc_post_url: Option<String>,
    /// Platform options as authored, JSON-encoded.
    pub options: Option<String>,
    pub created_at: i64,
}

impl ContentItem {
    /// Create a draft item. Intended for tests and the authoring seam;
    /// the engine itself never creates top-level content.
    pub fn new(user_id: String, body: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            body,
            content_type: "post".to_string(),
            status: ItemStatus::Draft,
            scheduled_at: None,
            published_at: None,
            is_scheduled: false,
            error_message: None,
            retry_count: 0,
            last_retry_at: None,
            failed_at: None,
            parent_item_id: None,
            comment_delay_minutes: None,
            reply_to_post_id: None,
            adhoc_account_id: None,
            adhoc_platform: None,
            adhoc_post_id: None,
            adhoc_post_url: None,
            options: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Schedule the item for a future time.
    pub fn schedule(&mut self, at: i64) {
        self.status = ItemStatus::Scheduled;
        self.scheduled_at = Some(at);
        self.is_scheduled = true;
    }

    pub fn is_reply(&self) -> bool {
        self.parent_item_id.is_some()
    }

    /// Decode the authored platform options; absent or empty means defaults.
    pub fn platform_options(&self) -> crate::error::Result<PlatformOptions> {
        match &self.options {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|e| {
                crate::error::SyndicateError::InvalidInput(format!(
                    "Malformed platform options on item {}: {}",
                    self.id, e
                ))
            }),
            _ => Ok(PlatformOptions::default()),
        }
    }
}

/// One (content item x destination account) delivery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub item_id: String,
    pub account_id: String,
    pub platform: PlatformId,
    pub status: PublicationStatus,
    pub platform_post_id: Option<String>,
    pub platform_url: Option<String>,
    pub scheduled_for: Option<i64>,
    pub published_at: Option<i64>,
    pub retry_count: i64,
    pub last_retry_at: Option<i64>,
    pub error_message: Option<String>,
    pub failed_at: Option<i64>,
    pub reply_to_post_id: Option<String>,
    pub like_count: i64,
    pub reply_count: i64,
    pub view_count: i64,
    pub last_synced_at: Option<i64>,
}

impl Publication {
    pub fn new(item_id: String, account_id: String, platform: PlatformId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id,
            account_id,
            platform,
            status: PublicationStatus::Scheduled,
            platform_post_id: None,
            platform_url: None,
            scheduled_for: None,
            published_at: None,
            retry_count: 0,
            last_retry_at: None,
            error_message: None,
            failed_at: None,
            reply_to_post_id: None,
            like_count: 0,
            reply_count: 0,
            view_count: 0,
            last_synced_at: None,
        }
    }
}

/// A linked external account, owned by the user. The engine reads
/// credentials only through the credential provider and never writes
/// tokens itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationAccount {
    pub id: String,
    pub user_id: String,
    pub platform: PlatformId,
    pub handle: String,
    pub platform_user_id: String,
    pub status: AccountStatus,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "video" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

/// An ordered media attachment. Position defines carousel order; the
/// first attachment is the cover. URLs are already-resolved public
/// URLs supplied by the media storage path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    pub item_id: String,
    pub position: i64,
    pub kind: MediaKind,
    pub url: String,
    pub alt_text: Option<String>,
}

impl MediaAttachment {
    pub fn new(item_id: String, position: i64, kind: MediaKind, url: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id,
            position,
            kind,
            url,
            alt_text: None,
        }
    }
}

/// Who may reply to a published post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyControl {
    Everyone,
    AccountsYouFollow,
    MentionedOnly,
}

impl ReplyControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyControl::Everyone => "everyone",
            ReplyControl::AccountsYouFollow => "accounts_you_follow",
            ReplyControl::MentionedOnly => "mentioned_only",
        }
    }
}

/// A poll attached to a post: two to four answer options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAttachment {
    pub options: Vec<String>,
}

impl PollAttachment {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.options.len() < 2 || self.options.len() > 4 {
            return Err(crate::error::SyndicateError::InvalidInput(format!(
                "Poll must have 2-4 options, got {}",
                self.options.len()
            )));
        }
        Ok(())
    }
}

/// Structured per-post platform options.
///
/// Mutually independent optional fields in one plain struct; each
/// strategy reads only the fields it understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformOptions {
    pub topic_tag: Option<String>,
    pub reply_control: Option<ReplyControl>,
    pub poll: Option<PollAttachment>,
    pub location_id: Option<String>,
    pub ghost: bool,
    pub link_attachment: Option<String>,
    /// Platform post id of the parent, set for scheduled replies.
    pub reply_to_id: Option<String>,
}
