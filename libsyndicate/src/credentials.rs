//! Credential resolution for platform dispatch
//!
//! Strategies never read the accounts table themselves; they receive a
//! resolved [`Credential`] through the [`CredentialProvider`] seam.
//! The stored provider is the production implementation; tests swap in
//! a static one.

use async_trait::async_trait;

use crate::db::Database;
use crate::error::{CredentialError, Result};
use crate::types::{AccountStatus, PlatformId};

/// A resolved, ready-to-use credential for one destination account.
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: String,
    pub platform: PlatformId,
    pub platform_user_id: String,
    pub access_token: String,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve the credential for an account, or a [`CredentialError`]
    /// describing why it cannot be used.
    async fn resolve(&self, account_id: &str) -> Result<Credential>;
}

/// Resolves credentials from the `destination_accounts` table,
/// mapping account status and token expiry to the credential error
/// taxonomy.
pub struct StoredCredentialProvider {
    db: Database,
}

impl StoredCredentialProvider {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    async fn resolve(&self, account_id: &str) -> Result<Credential> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| CredentialError::Missing(account_id.to_string()))?;

        match account.status {
            AccountStatus::Revoked => {
                return Err(CredentialError::Revoked(account.handle.clone()).into())
            }
            AccountStatus::Expired => {
                return Err(CredentialError::Expired(account.handle.clone()).into())
            },
            AccountStatus::Active | AccountStatus::Error | AccountStatus::Pending => {}
        }

        if let Some(expires_at) = account.token_expires_at {
            if expires_at <= chrono::Utc::now().timestamp() {
                return Err(CredentialError::Expired(account.handle.clone()).into());
            }
        }

        let access_token = account
            .access_token
            .ok_or_else(|| CredentialError::Missing(account_id.to_string()))?;

        Ok(Credential {
            account_id: account.id,
            platform: account.platform,
            platform_user_id: account.platform_user_id,
            access_token,
        })
    }
}

/// Fixed-answer provider for tests and dry runs.
pub struct StaticCredentialProvider {
    credentials: std::collections::HashMap<String, Credential>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self {
            credentials: std::collections::HashMap::new(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credentials
            .insert(credential.account_id.clone(), credential);
        self
    }
}

impl Default for StaticCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, account_id: &str) -> Result<Credential> {
        self.credentials
            .get(account_id)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(account_id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyndicateError;
    use crate::types::DestinationAccount;

    fn account(status: AccountStatus, token: Option<&str>) -> DestinationAccount {
        DestinationAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "user-1".to_string(),
            platform: PlatformId::Threads,
            handle: "tester".to_string(),
            platform_user_id: "pu-1".to_string(),
            status,
            access_token: token.map(String::from),
            refresh_token: None,
            token_expires_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_resolves_active_account() {
        let db = Database::in_memory().await.unwrap();
        let acct = account(AccountStatus::Active, Some("tok"));
        db.insert_account(&acct).await.unwrap();

        let provider = StoredCredentialProvider::new(db);
        let cred = provider.resolve(&acct.id).await.unwrap();
        assert_eq!(cred.access_token, "tok");
        assert_eq!(cred.platform, PlatformId::Threads);
    }

    #[tokio::test]
    async fn test_revoked_account_is_permanent() {
        let db = Database::in_memory().await.unwrap();
        let acct = account(AccountStatus::Revoked, Some("tok"));
        db.insert_account(&acct).await.unwrap();

        let provider = StoredCredentialProvider::new(db);
        let err = provider.resolve(&acct.id).await.unwrap_err();
        assert!(matches!(
            err,
            SyndicateError::Credential(CredentialError::Revoked(_))
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_expired_token_timestamp() {
        let db = Database::in_memory().await.unwrap();
        let mut acct = account(AccountStatus::Active, Some("tok"));
        acct.token_expires_at = Some(1); // long past
        db.insert_account(&acct).await.unwrap();

        let provider = StoredCredentialProvider::new(db);
        let err = provider.resolve(&acct.id).await.unwrap_err();
        assert!(matches!(
            err,
            SyndicateError::Credential(CredentialError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_account_and_missing_token() {
        let db = Database::in_memory().await.unwrap();
        let provider = StoredCredentialProvider::new(db.clone());

        let err = provider.resolve("nope").await.unwrap_err();
        assert!(matches!(
            err,
            SyndicateError::Credential(CredentialError::Missing(_))
        ));

        let acct = account(AccountStatus::Active, None);
        db.insert_account(&acct).await.unwrap();
        let err = provider.resolve(&acct.id).await.unwrap_err();
        assert!(matches!(
            err,
            SyndicateError::Credential(CredentialError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticCredentialProvider::new().with_credential(Credential {
            account_id: "a-1".to_string(),
            platform: PlatformId::Mastodon,
            platform_user_id: "pu-9".to_string(),
            access_token: "tok".to_string(),
        });

        assert!(provider.resolve("a-1").await.is_ok());
        assert!(provider.resolve("a-2").await.is_err());
    }
}
