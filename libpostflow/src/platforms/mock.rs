//! Mock platform adapter for testing
//!
//! A configurable adapter that can simulate successes, failures, delays and
//! panics without network access. It records every call and tracks how many
//! operations were in flight at once, which lets tests assert concurrency
//! bounds of the worker and the refresh coordinator.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::{PlatformAdapter, PublishReceipt, PublishRequest, RefreshedToken};
use crate::types::SocialAccount;

/// A publish call as observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedCall {
    pub post_id: i64,
    pub account_id: i64,
    pub media_count: usize,
    pub access_token: String,
}

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name the adapter registers under
    pub name: String,

    /// Error returned from `publish`, if any
    pub publish_error: Option<PlatformError>,

    /// Error returned from `refresh_token`, if any
    pub refresh_error: Option<PlatformError>,

    /// Error returned from `revoke_access`, if any
    pub revoke_error: Option<PlatformError>,

    /// Panic inside `publish` instead of returning
    pub panic_on_publish: bool,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Lifetime of refreshed access tokens
    pub token_lifetime_secs: i64,

    /// Whether a refresh hands out a new refresh token
    pub rotates_refresh_token: bool,

    pub publish_calls: Arc<Mutex<Vec<PublishedCall>>>,
    pub refresh_call_count: Arc<Mutex<usize>>,
    pub revoke_call_count: Arc<Mutex<usize>>,

    /// Operations currently executing
    pub in_flight: Arc<AtomicUsize>,

    /// Highest value `in_flight` has reached
    pub max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_error: None,
            refresh_error: None,
            revoke_error: None,
            panic_on_publish: false,
            delay: Duration::from_millis(0),
            token_lifetime_secs: 3600,
            rotates_refresh_token: true,
            publish_calls: Arc::new(Mutex::new(Vec::new())),
            refresh_call_count: Arc::new(Mutex::new(0)),
            revoke_call_count: Arc::new(Mutex::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Mock adapter for testing
#[derive(Debug, Clone)]
pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    /// Create a new mock adapter with the given configuration
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock adapter that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock adapter whose publish fails
    pub fn publish_failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_error: Some(error),
            ..Default::default()
        })
    }

    /// Create a mock adapter whose refresh fails
    pub fn refresh_failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            refresh_error: Some(error),
            ..Default::default()
        })
    }

    /// Create a mock adapter whose revoke fails
    pub fn revoke_failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            revoke_error: Some(error),
            ..Default::default()
        })
    }

    /// Create a mock adapter with a delay on every operation
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Create a mock adapter that panics while publishing
    pub fn panicking(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            panic_on_publish: true,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn publish_calls(&self) -> Vec<PublishedCall> {
        self.config
            .publish_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn publish_call_count(&self) -> usize {
        self.publish_calls().len()
    }

    pub fn refresh_call_count(&self) -> usize {
        self.config.refresh_call_count.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn revoke_call_count(&self) -> usize {
        self.config.revoke_call_count.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.config.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_work(&self) -> InFlight {
        let guard = InFlight::enter(&self.config);
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
        guard
    }
}

/// Tracks one in-flight operation; leaving scope decrements the gauge
struct InFlight {
    in_flight: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(config: &MockConfig) -> Self {
        let now = config.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        config.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            in_flight: config.in_flight.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let _guard = self.simulate_work().await;

        if let Ok(mut calls) = self.config.publish_calls.lock() {
            calls.push(PublishedCall {
                post_id: request.post.id,
                account_id: request.account.id,
                media_count: request.media.len(),
                access_token: request.access_token.expose_secret().to_string(),
            });
        }

        if self.config.panic_on_publish {
            panic!("mock adapter {} panicked while publishing", self.config.name);
        }

        if let Some(error) = &self.config.publish_error {
            return Err(error.clone().into());
        }

        Ok(PublishReceipt {
            platform_post_id: format!("{}-{}-{}", self.config.name, request.post.id, request.account.id),
        })
    }

    async fn refresh_token(
        &self,
        account: &SocialAccount,
        _refresh_token: &SecretString,
    ) -> Result<RefreshedToken> {
        let _guard = self.simulate_work().await;

        let count = match self.config.refresh_call_count.lock() {
            Ok(mut count) => {
                *count += 1;
                *count
            }
            Err(_) => 0,
        };

        if let Some(error) = &self.config.refresh_error {
            return Err(error.clone().into());
        }

        let refresh_token = if self.config.rotates_refresh_token {
            Some(SecretString::from(format!("refresh-{}-{}", account.id, count)))
        } else {
            None
        };

        Ok(RefreshedToken {
            access_token: SecretString::from(format!("access-{}-{}", account.id, count)),
            refresh_token,
            expires_at: chrono::Utc::now().timestamp() + self.config.token_lifetime_secs,
        })
    }

    async fn revoke_access(&self, _account: &SocialAccount, _access_token: &SecretString) -> Result<()> {
        let _guard = self.simulate_work().await;

        if let Ok(mut count) = self.config.revoke_call_count.lock() {
            *count += 1;
        }

        match &self.config.revoke_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }
}
