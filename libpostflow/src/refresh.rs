//! Token refresh coordinator
//!
//! Periodically refreshes OAuth tokens before they expire. Each sweep selects
//! every account whose token expires within the refresh window, or has
//! already expired, and refreshes them concurrently on a bounded
//! [`TaskGroup`]. New tokens are written with a compare-and-swap against the
//! access token read at selection time, so a concurrent rotation wins and
//! this sweep backs off.
//!
//! Failures are logged and left for the next sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PostflowError, Result};
use crate::platforms::AdapterRegistry;
use crate::task_group::TaskGroup;
use crate::types::SocialAccount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Refreshed,
    Conflict,
    Failed,
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub selected: usize,
    pub refreshed: usize,
    pub conflicts: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct TokenRefresher {
    db: Database,
    credentials: CredentialStore,
    adapters: Arc<AdapterRegistry>,
    window: Duration,
    concurrency: usize,
}

impl TokenRefresher {
    pub fn new(
        db: Database,
        credentials: CredentialStore,
        adapters: Arc<AdapterRegistry>,
        window: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            credentials,
            adapters,
            window,
            concurrency,
        }
    }

    /// Run one sweep now
    pub async fn sweep(&self) -> Result<RefreshSummary> {
        self.sweep_at(chrono::Utc::now().timestamp()).await
    }

    /// Run one sweep as of `now`
    ///
    /// # Errors
    ///
    /// Only fails if the candidate accounts cannot be listed. Per-account
    /// failures are counted in the summary.
    pub async fn sweep_at(&self, now: i64) -> Result<RefreshSummary> {
        let accounts = self
            .db
            .list_accounts_expiring(now, self.window.as_secs() as i64)
            .await?;

        let mut summary = RefreshSummary {
            selected: accounts.len(),
            ..Default::default()
        };

        if accounts.is_empty() {
            tracing::debug!("no tokens due for refresh");
            return Ok(summary);
        }

        tracing::info!(accounts = accounts.len(), "refreshing tokens");

        let mut group = TaskGroup::new(self.concurrency);
        for account in accounts {
            let refresher = self.clone();
            group
                .spawn(account.id, async move { refresher.refresh_unit(account).await })
                .await;
        }

        for (account_id, joined) in group.join().await {
            match joined {
                Ok(UnitOutcome::Refreshed) => summary.refreshed += 1,
                Ok(UnitOutcome::Conflict) => summary.conflicts += 1,
                Ok(UnitOutcome::Failed) => summary.failed += 1,
                Err(panic) => {
                    tracing::error!(account_id, "refresh unit {}", panic);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            refreshed = summary.refreshed,
            conflicts = summary.conflicts,
            failed = summary.failed,
            "token refresh sweep finished"
        );

        Ok(summary)
    }

    async fn refresh_unit(&self, account: SocialAccount) -> UnitOutcome {
        match self.refresh_account(&account).await {
            Ok(()) => {
                tracing::debug!(account_id = account.id, platform = %account.platform, "token refreshed");
                UnitOutcome::Refreshed
            }
            Err(PostflowError::CasConflict { .. }) => {
                tracing::info!(account_id = account.id, "token rotated concurrently, leaving it");
                UnitOutcome::Conflict
            }
            Err(e) => {
                tracing::warn!(account_id = account.id, platform = %account.platform, "token refresh failed: {}", e);
                UnitOutcome::Failed
            }
        }
    }

    async fn refresh_account(&self, account: &SocialAccount) -> Result<()> {
        let adapter = self.adapters.get(&account.platform)?;
        let refresh_token = self.credentials.refresh_token(account)?;
        let refreshed = adapter.refresh_token(account, &refresh_token).await?;
        self.credentials.rotate(account, &refreshed).await
    }

    /// Sweep every `interval` until `shutdown` is set
    ///
    /// The first sweep runs immediately.
    pub async fn run(&self, interval: Duration, shutdown: Arc<AtomicBool>) {
        let tick = interval.min(Duration::from_secs(1));

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Err(e) = self.sweep().await {
                tracing::error!("token refresh sweep failed: {}", e);
            }

            // Sleep until next sweep (check shutdown every tick)
            let mut waited = Duration::ZERO;
            while waited < interval {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(tick).await;
                waited += tick;
            }
        }

        tracing::info!("token refresher stopped");
    }
}
