//! # libsyndicate
//!
//! Core library for Syndicate, a scheduled multi-platform publishing
//! engine. A cron-style entry point runs passes over a SQLite queue:
//! due content items are claimed atomically, dispatched to platform
//! strategies (Threads, Instagram, Mastodon), retried with backoff on
//! transient failures, and rolled up into an aggregate item status.
//! Replies publish after their parent with the parent's platform post
//! id as the reply anchor.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod platforms;
pub mod scheduler;
pub mod types;

pub use config::{Config, PublisherConfig};
pub use credentials::{Credential, CredentialProvider, StoredCredentialProvider};
pub use db::{Database, UnitOfWork};
pub use error::{
    ConfigError, CredentialError, DbError, PlatformError, Result, SyndicateError,
};
pub use orchestrator::{ItemOutcome, Orchestrator, OutcomeKind};
pub use platforms::{PublishReceipt, PublishRequest, Strategy, StrategyRegistry};
pub use scheduler::{DueItem, Scheduler};
pub use types::{
    AccountStatus, ContentItem, DestinationAccount, ItemStatus, MediaAttachment, MediaKind,
    PlatformId, PlatformOptions, PollAttachment, Publication, PublicationStatus, ReplyControl,
};
