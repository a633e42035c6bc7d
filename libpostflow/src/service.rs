//! Service facade wiring the engine together
//!
//! `PostflowService` owns the shared resources (database, token cipher,
//! adapter registry, queue) and hands out the components built on them:
//!
//! - `Scheduler`: enqueue posts for delayed delivery
//! - `PublishWorker`: deliver due posts to their accounts
//! - `TokenRefresher`: keep OAuth tokens fresh
//! - `AccountService`: link and remove accounts
//!
//! # Example
//!
//! ```no_run
//! use libpostflow::{Config, PostflowService};
//!
//! # async fn example() -> libpostflow::Result<()> {
//! let config = Config::load()?;
//! let service = PostflowService::from_config(config).await?;
//!
//! let task = service
//!     .scheduler()
//!     .schedule(42, chrono::Utc::now() + chrono::Duration::hours(1))
//!     .await?;
//! println!("queued {}", task.task_id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::accounts::AccountService;
use crate::config::Config;
use crate::credentials::{CredentialStore, TokenCipher};
use crate::db::Database;
use crate::error::Result;
use crate::platforms::AdapterRegistry;
use crate::queue::{SqliteTaskQueue, TaskQueue};
use crate::refresh::TokenRefresher;
use crate::scheduler::Scheduler;
use crate::worker::PublishWorker;

pub struct PostflowService {
    config: Arc<Config>,
    db: Database,
    queue: Arc<SqliteTaskQueue>,
    scheduler: Scheduler,
    worker: PublishWorker,
    refresher: TokenRefresher,
    accounts: AccountService,
}

impl PostflowService {
    /// Create a service with the production adapters for every configured
    /// platform
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the encryption key is missing or malformed
    /// - the HTTP client cannot be built
    /// - the database cannot be opened or migrated
    pub async fn from_config(config: Config) -> Result<Self> {
        let client = config.http_client()?;
        let adapters = AdapterRegistry::from_config(&config, client);
        Self::with_adapters(config, adapters).await
    }

    /// Create a service with a caller-provided adapter registry
    pub async fn with_adapters(config: Config, adapters: AdapterRegistry) -> Result<Self> {
        let cipher = config.token_cipher()?;
        let db = Database::new(&config.database.path).await?;
        Ok(Self::assemble(config, db, cipher, adapters))
    }

    fn assemble(config: Config, db: Database, cipher: TokenCipher, adapters: AdapterRegistry) -> Self {
        let adapters = Arc::new(adapters);
        let credentials = CredentialStore::new(cipher, db.clone());
        let queue = Arc::new(SqliteTaskQueue::new(db.clone(), config.worker.max_attempts));

        let scheduler = Scheduler::new(queue.clone());
        let worker = PublishWorker::new(
            db.clone(),
            credentials.clone(),
            adapters.clone(),
            config.worker.publish_concurrency,
        );
        let refresher = TokenRefresher::new(
            db.clone(),
            credentials.clone(),
            adapters.clone(),
            config.refresh.window(),
            config.refresh.concurrency,
        );
        let accounts = AccountService::new(db.clone(), credentials, adapters);

        Self {
            config: Arc::new(config),
            db,
            queue,
            scheduler,
            worker,
            refresher,
            accounts,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        self.queue.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn worker(&self) -> &PublishWorker {
        &self.worker
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    /// Claim and publish due posts once
    pub async fn process_due(&self) -> Result<usize> {
        self.worker
            .process_due(
                self.queue.as_ref(),
                &self.config.worker,
                chrono::Utc::now().timestamp(),
            )
            .await
    }
}
