//! Postflow - scheduled publishing to social platforms
//!
//! This library holds the publishing engine: a durable delayed queue of
//! publish jobs, a worker that fans each post out to its selected accounts,
//! platform adapters, and a coordinator that keeps OAuth tokens fresh.
//! Tokens are encrypted at rest.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod queue;
pub mod refresh;
pub mod scheduler;
pub mod service;
pub mod task_group;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialStore, TokenCipher};
pub use db::Database;
pub use error::{PostflowError, Result};
pub use platforms::{AdapterRegistry, PlatformAdapter};
pub use queue::{SqliteTaskQueue, TaskQueue};
pub use service::PostflowService;
pub use types::{NewPost, NewSocialAccount, Post, PostStatus, PostType, PostingHistory, SocialAccount};
