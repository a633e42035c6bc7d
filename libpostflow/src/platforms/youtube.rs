//! YouTube adapter (Data API v3)
//!
//! Uploads use the resumable protocol: the video is downloaded from its media
//! URL, an upload session is opened with the metadata, and the bytes are sent
//! to the session URL in one request.
//!
//! Google does not issue a new refresh token on refresh, so the stored one is
//! kept.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{status_error, PlatformAdapter, PublishReceipt, PublishRequest, RefreshedToken};
use crate::types::{MediaType, SocialAccount};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
const DEFAULT_OAUTH_BASE: &str = "https://oauth2.googleapis.com";

/// "People & Blogs"
const CATEGORY_ID: &str = "22";
const MAX_TITLE_CHARS: usize = 100;

pub struct YouTubeAdapter {
    client: reqwest::Client,
    api_base: String,
    oauth_base: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl YouTubeAdapter {
    pub fn new(client: reqwest::Client, app: &OAuthAppConfig) -> Self {
        let (api_base, oauth_base) = match &app.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/').to_string();
                (base.clone(), base)
            }
            None => (DEFAULT_API_BASE.to_string(), DEFAULT_OAUTH_BASE.to_string()),
        };

        Self {
            client,
            api_base,
            oauth_base,
            client_id: app.client_id.clone(),
            client_secret: app.client_secret.clone(),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Publishing(format!(
                "failed to fetch video asset: HTTP {}",
                status.as_u16()
            ))
            .into());
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Video title: the post title, or the caption's first line when unset
fn video_title(title: &str, caption: &str) -> String {
    let source = if title.trim().is_empty() {
        caption.lines().next().unwrap_or("")
    } else {
        title
    };
    let title: String = source.chars().take(MAX_TITLE_CHARS).collect();
    if title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let token = request.access_token.expose_secret();
        let video = request
            .media
            .iter()
            .find(|m| m.media_type == MediaType::Video)
            .ok_or_else(|| PlatformError::Publishing("youtube posts need a video".to_string()))?;

        let bytes = self.download(&video.url).await?;

        let session = self
            .client
            .post(format!("{}/upload/youtube/v3/videos", self.api_base))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&json!({
                "snippet": {
                    "title": video_title(&request.post.title, &request.post.caption),
                    "description": request.post.caption,
                    "categoryId": CATEGORY_ID,
                },
                "status": { "privacyStatus": "public" },
            }))
            .send()
            .await?;

        let status = session.status();
        if !status.is_success() {
            let text = session.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        let upload_url = session
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PlatformError::InvalidResponse("upload session without Location".to_string()))?;

        let upload = self
            .client
            .put(upload_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "video/*")
            .body(bytes)
            .send()
            .await?;

        let status = upload.status();
        if !status.is_success() {
            let text = upload.text().await.unwrap_or_default();
            return Err(status_error(status, &text).into());
        }

        let uploaded: VideoResponse = upload.json().await?;
        tracing::debug!(account_id = request.account.id, video_id = %uploaded.id, "youtube video uploaded");

        Ok(PublishReceipt {
            platform_post_id: uploaded.id,
        })
    }

    async fn refresh_token(
        &self,
        _account: &SocialAccount,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken> {
        let response = self
            .client
            .post(format!("{}/token", self.oauth_base))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // invalid_grant comes back as 400
            return Err(match status.as_u16() {
                400 => PlatformError::Authentication(text),
                _ => status_error(status, &text),
            }
            .into());
        }

        let token: TokenResponse = response.json().await?;
        Ok(RefreshedToken {
            access_token: SecretString::from(token.access_token),
            refresh_token: None,
            expires_at: chrono::Utc::now().timestamp() + token.expires_in,
        })
    }

    async fn revoke_access(&self, _account: &SocialAccount, access_token: &SecretString) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/revoke", self.oauth_base))
            .form(&[("token", access_token.expose_secret())])
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
