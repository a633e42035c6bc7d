//! Core types for Postflow

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DbError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    /// One media item
    Single,
    /// Ordered set of media (carousel, photo mode)
    Multiple,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Single => "single",
            PostType::Multiple => "multiple",
        }
    }
}

impl FromStr for PostType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(PostType::Single),
            "multiple" => Ok(PostType::Multiple),
            other => Err(DbError::Corrupt(format!("post type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }
}

impl FromStr for PostStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            other => Err(DbError::Corrupt(format!("post status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub owner_id: i64,
    pub post_type: PostType,
    pub caption: String,
    pub title: String,
    pub scheduled_time: i64,
    pub status: PostStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a post together with its account selection and media
#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: i64,
    pub post_type: PostType,
    pub caption: String,
    pub title: String,
    pub scheduled_time: i64,
    pub account_ids: Vec<i64>,
    /// Media ids in display order
    pub media_ids: Vec<i64>,
}

/// A linked platform account.
///
/// `access_token` and `refresh_token` hold ciphertext in the
/// `base64(nonce || ciphertext)` column format, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: i64,
    pub owner_id: i64,
    pub platform: String,
    pub external_id: String,
    pub display_name: String,
    pub username: String,
    pub profile_picture_url: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: i64,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Plaintext tokens obtained from an OAuth exchange, before encryption
#[derive(Debug, Clone)]
pub struct NewSocialAccount {
    pub owner_id: i64,
    pub platform: String,
    pub external_id: String,
    pub display_name: String,
    pub username: String,
    pub profile_picture_url: String,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub token_expires_at: i64,
}

/// Encrypted token values for a compare-and-swap rotation.
///
/// `None` or empty fields leave the stored column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedAccount {
    pub post_id: i64,
    pub account_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl FromStr for MediaType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(DbError::Corrupt(format!("media type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaAsset {
    pub id: i64,
    pub owner_id: i64,
    pub url: String,
    pub media_type: MediaType,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostMedia {
    pub post_id: i64,
    pub media_id: i64,
    pub display_order: i64,
}

/// Outcome of one publish attempt for one (post, account) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostingHistory {
    pub id: Option<i64>,
    pub owner_id: i64,
    pub post_id: i64,
    pub account_id: i64,
    pub success: bool,
    /// Empty on success
    pub error_message: String,
    pub created_at: i64,
}

impl PostingHistory {
    pub fn succeeded(owner_id: i64, post_id: i64, account_id: i64) -> Self {
        Self {
            id: None,
            owner_id,
            post_id,
            account_id,
            success: true,
            error_message: String::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn failed(owner_id: i64, post_id: i64, account_id: i64, error: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id,
            post_id,
            account_id,
            success: false,
            error_message: error.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrips_through_column_text() {
        for status in [
            PostStatus::Draft,
            PostStatus::Scheduled,
            PostStatus::Posted,
            PostStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PostStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_column_values_are_rejected() {
        assert!("pending".parse::<PostStatus>().is_err());
        assert!("story".parse::<PostType>().is_err());
        assert!("audio".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_history_constructors() {
        let ok = PostingHistory::succeeded(1, 2, 3);
        assert!(ok.success);
        assert!(ok.error_message.is_empty());

        let failed = PostingHistory::failed(1, 2, 3, "Platform error: Network error: timeout");
        assert!(!failed.success);
        assert_eq!(failed.error_message, "Platform error: Network error: timeout");
    }
}
