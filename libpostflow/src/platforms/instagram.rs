//! Instagram adapter (Instagram API with Instagram Login)
//!
//! Publishing is a two step container flow: create a media container, then
//! publish it. Carousels create one container per item, then a parent
//! `CAROUSEL` container referencing the children.
//!
//! Instagram issues long-lived tokens that are refreshed with themselves, so
//! the refreshed access token is also stored as the refresh token. There is no
//! revoke endpoint; revoking access is a local no-op.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{status_error, PlatformAdapter, PublishReceipt, PublishRequest, RefreshedToken};
use crate::types::{MediaAsset, MediaType, PostType, SocialAccount};

const DEFAULT_BASE_URL: &str = "https://graph.instagram.com";
const API_VERSION: &str = "v21.0";

pub struct InstagramAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl InstagramAdapter {
    pub fn new(client: reqwest::Client, app: &OAuthAppConfig) -> Self {
        Self {
            client,
            base_url: app
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_VERSION, path)
    }

    async fn post_for_id(&self, url: &str, body: serde_json::Value) -> Result<String> {
        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        let created: IdResponse = response.json().await?;
        Ok(created.id)
    }

    /// Create an unpublished media container for one asset
    async fn create_container(
        &self,
        ig_user_id: &str,
        media: &MediaAsset,
        caption: Option<&str>,
        carousel_item: bool,
        access_token: &SecretString,
    ) -> Result<String> {
        let mut body = match media.media_type {
            MediaType::Image => json!({ "image_url": media.url }),
            MediaType::Video => json!({
                "video_url": media.url,
                "media_type": if carousel_item { "VIDEO" } else { "REELS" },
            }),
        };

        if let Some(caption) = caption {
            body["caption"] = json!(caption);
        }
        if carousel_item {
            body["is_carousel_item"] = json!(true);
        }
        body["access_token"] = json!(access_token.expose_secret());

        self.post_for_id(&self.api_url(&format!("{}/media", ig_user_id)), body)
            .await
    }

    async fn publish_container(
        &self,
        ig_user_id: &str,
        creation_id: &str,
        access_token: &SecretString,
    ) -> Result<String> {
        self.post_for_id(
            &self.api_url(&format!("{}/media_publish", ig_user_id)),
            json!({
                "creation_id": creation_id,
                "access_token": access_token.expose_secret(),
            }),
        )
        .await
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn name(&self) -> &str {
        "instagram"
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let ig_user_id = request.account.external_id.as_str();
        let token = request.access_token;
        let caption = request.post.caption.as_str();

        let first = request.media.first().ok_or_else(|| {
            PlatformError::Publishing("instagram posts need at least one media item".to_string())
        })?;

        let creation_id = match request.post.post_type {
            PostType::Single => {
                self.create_container(ig_user_id, first, Some(caption), false, token)
                    .await?
            }
            PostType::Multiple => {
                let mut children = Vec::with_capacity(request.media.len());
                for media in request.media {
                    children.push(
                        self.create_container(ig_user_id, media, None, true, token)
                            .await?,
                    );
                }

                self.post_for_id(
                    &self.api_url(&format!("{}/media", ig_user_id)),
                    json!({
                        "media_type": "CAROUSEL",
                        "caption": caption,
                        "children": children.join(","),
                        "access_token": token.expose_secret(),
                    }),
                )
                .await?
            }
        };

        let media_id = self.publish_container(ig_user_id, &creation_id, token).await?;
        tracing::debug!(account_id = request.account.id, media_id = %media_id, "instagram media published");

        Ok(PublishReceipt {
            platform_post_id: media_id,
        })
    }

    async fn refresh_token(
        &self,
        _account: &SocialAccount,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken> {
        let response = self
            .client
            .get(format!("{}/refresh_access_token", self.base_url))
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", refresh_token.expose_secret()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        let refreshed: RefreshResponse = response.json().await?;
        let token = SecretString::from(refreshed.access_token);

        Ok(RefreshedToken {
            refresh_token: Some(token.clone()),
            access_token: token,
            expires_at: chrono::Utc::now().timestamp() + refreshed.expires_in,
        })
    }

    async fn revoke_access(&self, account: &SocialAccount, _access_token: &SecretString) -> Result<()> {
        tracing::debug!(account_id = account.id, "instagram has no revoke endpoint, skipping");
        Ok(())
    }
}
