//! Platform adapter abstraction and implementations
//!
//! Each platform exposes the same three capabilities to the engine:
//! publishing a post to an account, refreshing the account's OAuth token,
//! and revoking the account's access. Adapters are looked up by platform name
//! in an [`AdapterRegistry`], so the worker, the refresh coordinator and
//! account removal never branch on platform strings themselves.
//!
//! Adapters receive an injected `reqwest::Client` and their OAuth application
//! credentials at construction. They do not retry; retries belong to the
//! queue (publishing) and to the next refresh sweep (tokens).
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpostflow::platforms::{AdapterRegistry, tiktok::TikTokAdapter};
//! use libpostflow::config::OAuthAppConfig;
//!
//! let client = reqwest::Client::new();
//! let app = OAuthAppConfig {
//!     client_id: "client-key".to_string(),
//!     client_secret: "client-secret".to_string(),
//!     base_url: None,
//! };
//!
//! let mut registry = AdapterRegistry::new();
//! registry.register(Arc::new(TikTokAdapter::new(client, &app)));
//! assert!(registry.get("tiktok").is_ok());
//! ```

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{MediaAsset, Post, SocialAccount};

pub mod instagram;
pub mod tiktok;
pub mod youtube;

// Mock adapter is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Everything an adapter needs to publish one post to one account
#[derive(Debug)]
pub struct PublishRequest<'a> {
    pub post: &'a Post,
    pub account: &'a SocialAccount,
    /// Post media in display order; a single entry for `single` posts
    pub media: &'a [MediaAsset],
    /// Decrypted access token for `account`
    pub access_token: &'a SecretString,
}

/// Platform-side identifier of a published post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub platform_post_id: String,
}

/// Tokens issued by a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: SecretString,
    /// `None` when the platform keeps the existing refresh token valid
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp at which the new access token expires
    pub expires_at: i64,
}

/// Adapter trait for one social platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Lowercase platform identifier, matching `SocialAccount::platform`
    fn name(&self) -> &str;

    /// Publish a post to the account in `request`
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` if the platform rejects the token
    /// - `PlatformError::Publishing` if the platform refuses the content
    /// - `PlatformError::Network` on transport failure or timeout
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt>;

    /// Exchange a refresh token for a new access token
    async fn refresh_token(
        &self,
        account: &SocialAccount,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken>;

    /// Revoke the application's access to the account
    async fn revoke_access(&self, account: &SocialAccount, access_token: &SecretString) -> Result<()>;
}

/// Platform name to adapter lookup
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the production adapters for every platform configured in `config`
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let mut registry = Self::new();

        if let Some(app) = &config.instagram {
            registry.register(Arc::new(instagram::InstagramAdapter::new(client.clone(), app)));
        }
        if let Some(app) = &config.tiktok {
            registry.register(Arc::new(tiktok::TikTokAdapter::new(client.clone(), app)));
        }
        if let Some(app) = &config.youtube {
            registry.register(Arc::new(youtube::YouTubeAdapter::new(client, app)));
        }

        registry
    }

    /// Register an adapter under its own name, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up the adapter for `platform`
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Unsupported` if no adapter is registered.
    pub fn get(&self, platform: &str) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(platform)
            .cloned()
            .ok_or_else(|| PlatformError::Unsupported(platform.to_string()).into())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Convert a non-success HTTP status into the matching platform error
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> PlatformError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(detail),
        429 => PlatformError::RateLimit(detail),
        500..=599 => PlatformError::Network(detail),
        _ => PlatformError::Publishing(detail),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
