//! Linking and removing platform accounts
//!
//! Removing an account revokes the application's access on the platform
//! before the row is deleted. If revocation fails the account is kept, so
//! the operator can retry instead of leaving a live grant behind.

use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PostflowError, Result};
use crate::platforms::AdapterRegistry;
use crate::types::NewSocialAccount;

#[derive(Clone)]
pub struct AccountService {
    db: Database,
    credentials: CredentialStore,
    adapters: Arc<AdapterRegistry>,
}

impl AccountService {
    pub fn new(db: Database, credentials: CredentialStore, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            db,
            credentials,
            adapters,
        }
    }

    /// Store an account obtained from an OAuth exchange
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Unsupported` if no adapter serves the platform.
    pub async fn link_account(&self, account: &NewSocialAccount) -> Result<i64> {
        self.adapters.get(&account.platform)?;
        let id = self.credentials.link_account(account).await?;
        tracing::info!(account_id = id, owner_id = account.owner_id, platform = %account.platform, "account linked");
        Ok(id)
    }

    /// Revoke access and delete the account
    ///
    /// # Errors
    ///
    /// - `PostflowError::Validation` for non-positive ids
    /// - `PostflowError::NotFound` if the account does not exist or belongs to
    ///   someone else
    /// - the adapter's error if revocation fails; the account is kept
    pub async fn remove_account(&self, owner_id: i64, account_id: i64) -> Result<()> {
        if owner_id <= 0 || account_id <= 0 {
            return Err(PostflowError::Validation(
                "owner id and account id must be positive".to_string(),
            ));
        }

        let not_found = || PostflowError::NotFound(format!("account {}", account_id));

        if !self.db.account_belongs_to(owner_id, account_id).await? {
            return Err(not_found());
        }
        let account = self
            .db
            .get_social_account(account_id)
            .await?
            .ok_or_else(not_found)?;

        let adapter = self.adapters.get(&account.platform)?;
        let access_token = self.credentials.access_token(&account)?;
        adapter.revoke_access(&account, &access_token).await?;

        self.db.remove_social_account(owner_id, account_id).await?;
        tracing::info!(account_id, owner_id, platform = %account.platform, "account removed");

        Ok(())
    }
}
