//! TikTok adapter (Content Posting API)
//!
//! Every publish first queries creator info, which validates the token and
//! the account's posting permission. Single posts pull a video from its URL;
//! multiple posts go out as a photo post in direct-post mode.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{status_error, PlatformAdapter, PublishReceipt, PublishRequest, RefreshedToken};
use crate::types::{MediaType, PostType, SocialAccount};

const DEFAULT_BASE_URL: &str = "https://open.tiktokapis.com";

pub struct TikTokAdapter {
    client: reqwest::Client,
    base_url: String,
    client_key: String,
    client_secret: String,
}

/// Envelope shared by Content Posting API responses
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Option<PublishData>,
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct PublishData {
    #[serde(default)]
    publish_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    log_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TikTokAdapter {
    pub fn new(client: reqwest::Client, app: &OAuthAppConfig) -> Self {
        Self {
            client,
            base_url: app
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client_key: app.client_id.clone(),
            client_secret: app.client_secret.clone(),
        }
    }

    async fn call(&self, path: &str, access_token: &SecretString, body: serde_json::Value) -> Result<ApiResponse> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(access_token.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();
        match parsed {
            Some(api) if api.error.code == "ok" && status.is_success() => Ok(api),
            Some(api) => Err(api_error(status, &api.error).into()),
            None if !status.is_success() => Err(status_error(status, &text).into()),
            None => Err(PlatformError::InvalidResponse(format!("unexpected TikTok response: {}", text)).into()),
        }
    }
}

fn api_error(status: reqwest::StatusCode, error: &ApiError) -> PlatformError {
    let detail = format!("{}: {} (log_id {})", error.code, error.message, error.log_id);
    match error.code.as_str() {
        "access_token_invalid" | "scope_not_authorized" | "token_not_authorized_for_specified_deployment" => {
            PlatformError::Authentication(detail)
        }
        "rate_limit_exceeded" | "spam_risk_too_many_posts" => PlatformError::RateLimit(detail),
        _ if status.is_server_error() => PlatformError::Network(detail),
        _ => PlatformError::Publishing(detail),
    }
}

fn token_error(response: &TokenResponse) -> PlatformError {
    PlatformError::Authentication(format!(
        "{}: {}",
        response.error.as_deref().unwrap_or("unknown_error"),
        response.error_description.as_deref().unwrap_or("")
    ))
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn name(&self) -> &str {
        "tiktok"
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let token = request.access_token;
        let post = request.post;

        self.call("/v2/post/publish/creator_info/query/", token, json!({}))
            .await?;

        let response = match post.post_type {
            PostType::Single => {
                let video = request
                    .media
                    .iter()
                    .find(|m| m.media_type == MediaType::Video)
                    .ok_or_else(|| PlatformError::Publishing("tiktok single posts need a video".to_string()))?;

                self.call(
                    "/v2/post/publish/video/init/",
                    token,
                    json!({
                        "post_info": {
                            "title": post.caption,
                            "privacy_level": "PUBLIC_TO_EVERYONE",
                            "disable_duet": false,
                            "disable_comment": false,
                            "disable_stitch": false,
                            "video_cover_timestamp_ms": 1000,
                        },
                        "source_info": {
                            "source": "PULL_FROM_URL",
                            "video_url": video.url,
                        },
                    }),
                )
                .await?
            }
            PostType::Multiple => {
                let photos: Vec<&str> = request
                    .media
                    .iter()
                    .filter(|m| m.media_type == MediaType::Image)
                    .map(|m| m.url.as_str())
                    .collect();

                if photos.is_empty() {
                    return Err(PlatformError::Publishing("tiktok photo posts need at least one image".to_string()).into());
                }

                self.call(
                    "/v2/post/publish/content/init/",
                    token,
                    json!({
                        "post_info": {
                            "title": post.title,
                            "description": post.caption,
                            "privacy_level": "PUBLIC_TO_EVERYONE",
                            "disable_comment": false,
                            "auto_add_music": true,
                        },
                        "source_info": {
                            "source": "PULL_FROM_URL",
                            "photo_cover_index": 0,
                            "photo_images": photos,
                        },
                        "post_mode": "DIRECT_POST",
                        "media_type": "PHOTO",
                    }),
                )
                .await?
            }
        };

        let publish_id = response
            .data
            .and_then(|d| d.publish_id)
            .ok_or_else(|| PlatformError::InvalidResponse("missing publish_id".to_string()))?;

        tracing::debug!(account_id = request.account.id, publish_id = %publish_id, "tiktok publish initiated");

        Ok(PublishReceipt {
            platform_post_id: publish_id,
        })
    }

    async fn refresh_token(
        &self,
        _account: &SocialAccount,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken> {
        let response = self
            .client
            .post(format!("{}/v2/oauth/token/", self.base_url))
            .form(&[
                ("client_key", self.client_key.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|_| {
            if status.is_success() {
                PlatformError::InvalidResponse(format!("unexpected TikTok token response: {}", text))
            } else {
                status_error(status, &text)
            }
        })?;

        match (&parsed.access_token, parsed.expires_in) {
            (Some(access_token), Some(expires_in)) if status.is_success() => Ok(RefreshedToken {
                access_token: SecretString::from(access_token.clone()),
                refresh_token: parsed.refresh_token.clone().map(SecretString::from),
                expires_at: chrono::Utc::now().timestamp() + expires_in,
            }),
            _ => Err(token_error(&parsed).into()),
        }
    }

    async fn revoke_access(&self, _account: &SocialAccount, access_token: &SecretString) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v2/oauth/revoke/", self.base_url))
            .form(&[
                ("client_key", self.client_key.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("token", access_token.expose_secret()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        Ok(())
    }
}
