//! Error types for Syndicate

use thiserror::Error;

use crate::types::PlatformId;

pub type Result<T> = std::result::Result<T, SyndicateError>;

#[derive(Error, Debug)]
pub enum SyndicateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyndicateError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicateError::InvalidInput(_) => 3,
            SyndicateError::Config(_) => 2,
            SyndicateError::Credential(_) => 2,
            SyndicateError::Platform(_) => 1,
            SyndicateError::Database(_) => 1,
        }
    }

    /// Whether a later pass may succeed where this one failed.
    ///
    /// Drives the retry-vs-terminal decision in the orchestrator; the
    /// retry ceiling still overrides a `true` here.
    pub fn is_transient(&self) -> bool {
        match self {
            SyndicateError::Platform(e) => e.is_transient(),
            SyndicateError::Credential(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown platform identifier: {0}")]
    UnknownPlatform(String),

    #[error("No strategy registered for platform: {0}")]
    PlatformNotRegistered(PlatformId),

    #[error("Duplicate strategy registration for platform: {0}")]
    DuplicateStrategy(PlatformId),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Decode(String),
}

/// Per-target delivery errors, split along the retry boundary.
///
/// `RateLimited`, `Timeout` and `Unavailable` are transient: the
/// publication stays eligible for a later pass. `InvalidMedia` and
/// `Rejected` are permanent and mark the target failed immediately.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    #[error("Media rejected: {0}")]
    InvalidMedia(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited(_)
                | PlatformError::Timeout(_)
                | PlatformError::Unavailable(_)
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("Account credentials revoked: {0}")]
    Revoked(String),

    #[error("Account credentials expired: {0}")]
    Expired(String),

    #[error("No credentials stored for account: {0}")]
    Missing(String),

    #[error("Credential provider failure: {0}")]
    Provider(String),
}

impl CredentialError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Provider(_))
    }
}
