//! Publish worker
//!
//! Consumes `schedule:post` tasks and publishes the post to every selected
//! account. Accounts are independent units on a bounded [`TaskGroup`]: one
//! account failing, or even panicking, never stops its siblings, and every
//! resolved account gets exactly one posting history row. Once all units
//! have finished the post is marked `posted`, whatever the individual
//! outcomes were; per-account results live in the history.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{PostflowError, QueueError, Result};
use crate::platforms::{AdapterRegistry, PublishRequest};
use crate::queue::{retry_delay, SchedulePostPayload, Task, TaskQueue, TASK_TYPE_SCHEDULE_POST};
use crate::task_group::TaskGroup;
use crate::types::{MediaAsset, Post, PostStatus, PostType, PostingHistory, SocialAccount};

/// Result of publishing to one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountOutcome {
    pub account_id: i64,
    pub platform: String,
    /// Platform-side id on success
    pub platform_post_id: Option<String>,
    /// Error message on failure; `None` means success
    pub error: Option<String>,
}

impl AccountOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one publish job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub post_id: i64,
    pub outcomes: Vec<AccountOutcome>,
    /// Selected account ids that could not be resolved
    pub skipped: Vec<i64>,
}

impl PublishSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

#[derive(Clone)]
pub struct PublishWorker {
    db: Database,
    credentials: CredentialStore,
    adapters: Arc<AdapterRegistry>,
    concurrency: usize,
}

impl PublishWorker {
    pub fn new(
        db: Database,
        credentials: CredentialStore,
        adapters: Arc<AdapterRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            credentials,
            adapters,
            concurrency,
        }
    }

    /// Handle one delivered task
    ///
    /// # Errors
    ///
    /// - `QueueError::UnknownTaskType` / `QueueError::Decode` for malformed tasks
    /// - anything [`PublishWorker::publish_post`] returns
    pub async fn handle_task(&self, task: &Task) -> Result<PublishSummary> {
        if task.task_type != TASK_TYPE_SCHEDULE_POST {
            return Err(QueueError::UnknownTaskType(task.task_type.clone()).into());
        }

        let payload = SchedulePostPayload::decode(&task.payload)?;
        self.publish_post(payload.post_id).await
    }

    /// Publish a post to all of its selected accounts
    ///
    /// # Errors
    ///
    /// - `PostflowError::NotFound` if the post does not exist
    /// - `PostflowError::Validation` if no accounts are selected
    /// - `PostflowError::Database` if the post or its selection cannot be read
    ///
    /// Per-account failures are not errors; they are recorded in the history
    /// and reported in the summary.
    pub async fn publish_post(&self, post_id: i64) -> Result<PublishSummary> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(format!("post {}", post_id)))?;

        let selected = self.db.list_selected_accounts(post_id).await?;
        if selected.is_empty() {
            return Err(PostflowError::Validation(format!(
                "no accounts selected for post {}",
                post_id
            )));
        }

        let mut accounts = Vec::with_capacity(selected.len());
        let mut skipped = Vec::new();
        for selection in &selected {
            match self.db.get_social_account(selection.account_id).await {
                Ok(Some(account)) => accounts.push(account),
                Ok(None) => {
                    tracing::warn!(post_id, account_id = selection.account_id, "selected account not found, skipping");
                    skipped.push(selection.account_id);
                }
                Err(e) => {
                    tracing::warn!(post_id, account_id = selection.account_id, "failed to load selected account, skipping: {}", e);
                    skipped.push(selection.account_id);
                }
            }
        }

        tracing::info!(
            post_id,
            accounts = accounts.len(),
            skipped = skipped.len(),
            "publishing post"
        );

        let platforms: HashMap<i64, String> = accounts
            .iter()
            .map(|a| (a.id, a.platform.clone()))
            .collect();

        let post = Arc::new(post);
        let mut group = TaskGroup::new(self.concurrency);
        for account in accounts {
            let worker = self.clone();
            let post = post.clone();
            group
                .spawn(account.id, async move { worker.publish_unit(&post, account).await })
                .await;
        }

        let mut outcomes = Vec::with_capacity(platforms.len());
        for (account_id, joined) in group.join().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(panic) => {
                    let platform = platforms.get(&account_id).cloned().unwrap_or_default();
                    let message = format!("{}: {}", platform, panic);
                    tracing::error!(post_id, account_id, "publish unit {}", panic);
                    self.record(&PostingHistory::failed(post.owner_id, post.id, account_id, &message))
                        .await;
                    outcomes.push(AccountOutcome {
                        account_id,
                        platform,
                        platform_post_id: None,
                        error: Some(message),
                    });
                }
            }
        }
        outcomes.sort_by_key(|o| o.account_id);

        self.db.update_post_status(post.id, PostStatus::Posted).await?;

        let summary = PublishSummary {
            post_id: post.id,
            outcomes,
            skipped,
        };
        tracing::info!(
            post_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "post publishing finished"
        );

        Ok(summary)
    }

    /// Publish to one account and record the outcome
    async fn publish_unit(&self, post: &Post, account: SocialAccount) -> AccountOutcome {
        let result = self.publish_to_account(post, &account).await;

        let (entry, outcome) = match result {
            Ok(platform_post_id) => {
                tracing::info!(post_id = post.id, account_id = account.id, platform = %account.platform, "published");
                (
                    PostingHistory::succeeded(post.owner_id, post.id, account.id),
                    AccountOutcome {
                        account_id: account.id,
                        platform: account.platform.clone(),
                        platform_post_id: Some(platform_post_id),
                        error: None,
                    },
                )
            }
            Err(e) => {
                let message = format!("{}: {}", account.platform, e);
                tracing::warn!(post_id = post.id, account_id = account.id, "publish failed: {}", message);
                (
                    PostingHistory::failed(post.owner_id, post.id, account.id, &message),
                    AccountOutcome {
                        account_id: account.id,
                        platform: account.platform.clone(),
                        platform_post_id: None,
                        error: Some(message),
                    },
                )
            }
        };

        self.record(&entry).await;
        outcome
    }

    async fn publish_to_account(&self, post: &Post, account: &SocialAccount) -> Result<String> {
        let adapter = self.adapters.get(&account.platform)?;
        let access_token = self.credentials.access_token(account)?;
        let media = self.load_media(post).await?;

        let receipt = adapter
            .publish(&PublishRequest {
                post,
                account,
                media: &media,
                access_token: &access_token,
            })
            .await?;

        Ok(receipt.platform_post_id)
    }

    /// Primary media for single posts, ordered media for multiple posts
    async fn load_media(&self, post: &Post) -> Result<Vec<MediaAsset>> {
        let links = match post.post_type {
            PostType::Single => self
                .db
                .get_primary_post_media(post.id)
                .await?
                .into_iter()
                .collect(),
            PostType::Multiple => self.db.list_post_media(post.id).await?,
        };

        let mut media = Vec::with_capacity(links.len());
        for link in links {
            match self.db.get_media_asset(link.media_id).await? {
                Some(asset) => media.push(asset),
                None => tracing::warn!(post_id = post.id, media_id = link.media_id, "media asset missing"),
            }
        }
        Ok(media)
    }

    async fn record(&self, entry: &PostingHistory) {
        if let Err(e) = self.db.create_posting_history(entry).await {
            tracing::error!(
                post_id = entry.post_id,
                account_id = entry.account_id,
                "failed to record posting history: {}",
                e
            );
        }
    }

    /// Claim and handle due tasks once
    ///
    /// Successful tasks are completed, terminal failures buried, and all other
    /// failures handed back to the queue with a backoff. Returns the number of
    /// tasks handled.
    pub async fn process_due(&self, queue: &dyn TaskQueue, settings: &WorkerConfig, now: i64) -> Result<usize> {
        let tasks = queue
            .claim_due(now, settings.batch_size, settings.lease())
            .await?;

        for task in &tasks {
            match self.handle_task(task).await {
                Ok(_) => queue.complete(&task.id).await?,
                Err(e) if e.is_terminal() => {
                    tracing::error!(task_id = %task.id, "task failed permanently: {}", e);
                    queue.bury(&task.id, &e.to_string()).await?;
                }
                Err(e) => {
                    let delay = retry_delay(settings.retry_base(), task.attempts);
                    let status = queue
                        .retry_later(&task.id, &e.to_string(), now + delay.as_secs() as i64)
                        .await?;
                    tracing::warn!(
                        task_id = %task.id,
                        attempts = task.attempts,
                        status = status.as_str(),
                        "task failed, handed back to queue: {}",
                        e
                    );
                }
            }
        }

        Ok(tasks.len())
    }
}
