//! Database operations for Postflow

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, PostflowError, Result};
use crate::types::{
    MediaAsset, MediaType, NewPost, Post, PostMedia, PostStatus, PostingHistory, SelectedAccount,
    SocialAccount, TokenUpdate,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    /// Create a post with its account selection and ordered media in one
    /// transaction. The post starts out `scheduled`.
    pub async fn create_post(&self, post: &NewPost) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = sqlx::query(
            r#"
            INSERT INTO posts (owner_id, post_type, caption, title, scheduled_time, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.owner_id)
        .bind(post.post_type.as_str())
        .bind(&post.caption)
        .bind(&post.title)
        .bind(post.scheduled_time)
        .bind(PostStatus::Scheduled.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let post_id = result.last_insert_rowid();

        for account_id in &post.account_ids {
            sqlx::query("INSERT INTO selected_accounts (post_id, account_id) VALUES (?, ?)")
                .bind(post_id)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        for (order, media_id) in post.media_ids.iter().enumerate() {
            sqlx::query("INSERT INTO post_media (post_id, media_id, display_order) VALUES (?, ?, ?)")
                .bind(post_id)
                .bind(media_id)
                .bind(order as i64)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(post_id)
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, post_type, caption, title, scheduled_time, status, created_at, updated_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| row_to_post(&r)).transpose()
    }

    /// Update post status
    pub async fn update_post_status(&self, post_id: i64, status: PostStatus) -> Result<()> {
        sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Social accounts
    // ------------------------------------------------------------------

    /// Insert an account whose token columns are already encrypted
    pub async fn create_social_account(&self, account: &SocialAccount) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO social_accounts (
                owner_id, platform, external_id, display_name, username, profile_picture_url,
                access_token, refresh_token, token_expires_at, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.owner_id)
        .bind(&account.platform)
        .bind(&account.external_id)
        .bind(&account.display_name)
        .bind(&account.username)
        .bind(&account.profile_picture_url)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.token_expires_at)
        .bind(&account.status)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_social_account(&self, account_id: i64) -> Result<Option<SocialAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, platform, external_id, display_name, username, profile_picture_url,
                   access_token, refresh_token, token_expires_at, status, created_at, updated_at
            FROM social_accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_account(&r)))
    }

    /// Check whether `account_id` is owned by `owner_id`
    pub async fn account_belongs_to(&self, owner_id: i64, account_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM social_accounts WHERE id = ? AND owner_id = ?")
            .bind(account_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.is_some())
    }

    /// Accounts whose token expires within `[now, now + window_secs]` or has
    /// already expired
    pub async fn list_accounts_expiring(&self, now: i64, window_secs: i64) -> Result<Vec<SocialAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, platform, external_id, display_name, username, profile_picture_url,
                   access_token, refresh_token, token_expires_at, status, created_at, updated_at
            FROM social_accounts
            WHERE token_expires_at BETWEEN ? AND ?
               OR token_expires_at < ?
            ORDER BY token_expires_at ASC
            "#,
        )
        .bind(now)
        .bind(now + window_secs)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Compare-and-swap token rotation.
    ///
    /// Applies `update` only if the stored access token for `owner_id` equals
    /// `expected_access_token`. Empty or unset fields keep the stored value.
    /// A single conditional `UPDATE` is the whole critical section; no row lock
    /// is held between the caller's read and this write.
    ///
    /// # Errors
    ///
    /// Returns `PostflowError::CasConflict` unless exactly one row matched.
    pub async fn set_token(
        &self,
        owner_id: i64,
        expected_access_token: &str,
        update: &TokenUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE social_accounts
            SET access_token = COALESCE(NULLIF(?, ''), access_token),
                refresh_token = COALESCE(NULLIF(?, ''), refresh_token),
                token_expires_at = COALESCE(?, token_expires_at),
                updated_at = ?
            WHERE owner_id = ? AND access_token = ?
            "#,
        )
        .bind(update.access_token.as_deref().unwrap_or(""))
        .bind(update.refresh_token.as_deref().unwrap_or(""))
        .bind(update.expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(owner_id)
        .bind(expected_access_token)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() != 1 {
            return Err(PostflowError::CasConflict { owner_id });
        }

        Ok(())
    }

    /// Delete an account owned by `owner_id`; returns whether a row was removed
    pub async fn remove_social_account(&self, owner_id: i64, account_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM social_accounts WHERE id = ? AND owner_id = ?")
            .bind(account_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Selected accounts
    // ------------------------------------------------------------------

    pub async fn list_selected_accounts(&self, post_id: i64) -> Result<Vec<SelectedAccount>> {
        let rows = sqlx::query(
            "SELECT post_id, account_id FROM selected_accounts WHERE post_id = ? ORDER BY account_id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| SelectedAccount {
                post_id: r.get("post_id"),
                account_id: r.get("account_id"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    pub async fn create_media_asset(&self, owner_id: i64, url: &str, media_type: MediaType) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO media_assets (owner_id, url, media_type, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(url)
        .bind(media_type.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_media_asset(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        let row = sqlx::query(
            "SELECT id, owner_id, url, media_type, created_at FROM media_assets WHERE id = ?",
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(r) => Ok(Some(MediaAsset {
                id: r.get("id"),
                owner_id: r.get("owner_id"),
                url: r.get("url"),
                media_type: r.get::<String, _>("media_type").parse()?,
                created_at: r.get("created_at"),
            })),
            None => Ok(None),
        }
    }

    /// The media item at display position 0
    pub async fn get_primary_post_media(&self, post_id: i64) -> Result<Option<PostMedia>> {
        let row = sqlx::query(
            "SELECT post_id, media_id, display_order FROM post_media WHERE post_id = ? AND display_order = 0",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_post_media(&r)))
    }

    /// All media for a post in display order
    pub async fn list_post_media(&self, post_id: i64) -> Result<Vec<PostMedia>> {
        let rows = sqlx::query(
            "SELECT post_id, media_id, display_order FROM post_media WHERE post_id = ? ORDER BY display_order ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_post_media).collect())
    }

    // ------------------------------------------------------------------
    // Posting history
    // ------------------------------------------------------------------

    pub async fn create_posting_history(&self, entry: &PostingHistory) -> Result<i64> {
        let success = if entry.success { 1 } else { 0 };

        let result = sqlx::query(
            r#"
            INSERT INTO posting_history (owner_id, post_id, account_id, success, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.owner_id)
        .bind(entry.post_id)
        .bind(entry.account_id)
        .bind(success)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_posting_history(&self, post_id: i64) -> Result<Vec<PostingHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, post_id, account_id, success, error_message, created_at
            FROM posting_history WHERE post_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PostingHistory {
                id: Some(r.get("id")),
                owner_id: r.get("owner_id"),
                post_id: r.get("post_id"),
                account_id: r.get("account_id"),
                success: r.get::<i64, _>("success") != 0,
                error_message: r.get("error_message"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

fn row_to_post(r: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        post_type: r.get::<String, _>("post_type").parse()?,
        caption: r.get("caption"),
        title: r.get("title"),
        scheduled_time: r.get("scheduled_time"),
        status: r.get::<String, _>("status").parse()?,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn row_to_account(r: &SqliteRow) -> SocialAccount {
    SocialAccount {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        platform: r.get("platform"),
        external_id: r.get("external_id"),
        display_name: r.get("display_name"),
        username: r.get("username"),
        profile_picture_url: r.get("profile_picture_url"),
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        token_expires_at: r.get("token_expires_at"),
        status: r.get("status"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn row_to_post_media(r: &SqliteRow) -> PostMedia {
    PostMedia {
        post_id: r.get("post_id"),
        media_id: r.get("media_id"),
        display_order: r.get("display_order"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostType;
    use tempfile::TempDir;

    async fn setup() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (db, temp_dir)
    }

    fn account(owner_id: i64, platform: &str, access: &str, expires_at: i64) -> SocialAccount {
        SocialAccount {
            id: 0,
            owner_id,
            platform: platform.to_string(),
            external_id: format!("ext-{}", access),
            display_name: String::new(),
            username: String::new(),
            profile_picture_url: String::new(),
            access_token: access.to_string(),
            refresh_token: format!("refresh-{}", access),
            token_expires_at: expires_at,
            status: "active".to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_database_creation_in_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("postflow.db");
        let result = Database::new(db_path.to_str().unwrap()).await;
        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_create_post_with_selection_and_media() {
        let (db, _dir) = setup().await;

        let m1 = db.create_media_asset(1, "https://cdn.example/a.jpg", MediaType::Image).await.unwrap();
        let m2 = db.create_media_asset(1, "https://cdn.example/b.jpg", MediaType::Image).await.unwrap();

        let post_id = db
            .create_post(&NewPost {
                owner_id: 1,
                post_type: PostType::Multiple,
                caption: "hello".to_string(),
                title: String::new(),
                scheduled_time: 1_700_000_000,
                account_ids: vec![11, 12],
                media_ids: vec![m2, m1],
            })
            .await
            .unwrap();

        let post = db.get_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.owner_id, 1);
        assert_eq!(post.post_type, PostType::Multiple);
        assert_eq!(post.status, PostStatus::Scheduled);

        let selected = db.list_selected_accounts(post_id).await.unwrap();
        assert_eq!(
            selected.iter().map(|s| s.account_id).collect::<Vec<_>>(),
            vec![11, 12]
        );

        let media = db.list_post_media(post_id).await.unwrap();
        assert_eq!(media.iter().map(|m| m.media_id).collect::<Vec<_>>(), vec![m2, m1]);

        let primary = db.get_primary_post_media(post_id).await.unwrap().unwrap();
        assert_eq!(primary.media_id, m2);
    }

    #[tokio::test]
    async fn test_get_missing_rows_returns_none() {
        let (db, _dir) = setup().await;
        assert!(db.get_post(404).await.unwrap().is_none());
        assert!(db.get_social_account(404).await.unwrap().is_none());
        assert!(db.get_media_asset(404).await.unwrap().is_none());
        assert!(db.get_primary_post_media(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_post_status() {
        let (db, _dir) = setup().await;
        let post_id = db
            .create_post(&NewPost {
                owner_id: 1,
                post_type: PostType::Single,
                caption: String::new(),
                title: String::new(),
                scheduled_time: 0,
                account_ids: vec![],
                media_ids: vec![],
            })
            .await
            .unwrap();

        db.update_post_status(post_id, PostStatus::Posted).await.unwrap();
        let post = db.get_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Posted);
    }

    #[tokio::test]
    async fn test_list_accounts_expiring_window() {
        let (db, _dir) = setup().await;
        let now = 1_800_000_000;

        let soon = db.create_social_account(&account(1, "tiktok", "a", now + 15 * 60)).await.unwrap();
        let expired = db.create_social_account(&account(1, "tiktok", "b", now - 5 * 60)).await.unwrap();
        let later = db.create_social_account(&account(1, "tiktok", "c", now + 45 * 60)).await.unwrap();

        let ids: Vec<i64> = db
            .list_accounts_expiring(now, 30 * 60)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();

        assert!(ids.contains(&soon));
        assert!(ids.contains(&expired));
        assert!(!ids.contains(&later));
    }

    #[tokio::test]
    async fn test_set_token_applies_on_match() {
        let (db, _dir) = setup().await;
        let id = db.create_social_account(&account(5, "youtube", "old", 100)).await.unwrap();

        db.set_token(
            5,
            "old",
            &TokenUpdate {
                access_token: Some("new".to_string()),
                refresh_token: None,
                expires_at: Some(500),
            },
        )
        .await
        .unwrap();

        let stored = db.get_social_account(id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new");
        // unset refresh token keeps the stored one
        assert_eq!(stored.refresh_token, "refresh-old");
        assert_eq!(stored.token_expires_at, 500);
    }

    #[tokio::test]
    async fn test_set_token_empty_fields_keep_stored_values() {
        let (db, _dir) = setup().await;
        let id = db.create_social_account(&account(5, "youtube", "old", 100)).await.unwrap();

        db.set_token(
            5,
            "old",
            &TokenUpdate {
                access_token: Some(String::new()),
                refresh_token: Some(String::new()),
                expires_at: None,
            },
        )
        .await
        .unwrap();

        let stored = db.get_social_account(id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "old");
        assert_eq!(stored.refresh_token, "refresh-old");
        assert_eq!(stored.token_expires_at, 100);
    }

    #[tokio::test]
    async fn test_set_token_stale_expected_value_conflicts() {
        let (db, _dir) = setup().await;
        let id = db.create_social_account(&account(5, "youtube", "current", 100)).await.unwrap();

        let result = db
            .set_token(
                5,
                "stale",
                &TokenUpdate {
                    access_token: Some("new".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(PostflowError::CasConflict { owner_id: 5 })));
        let stored = db.get_social_account(id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "current");
    }

    #[tokio::test]
    async fn test_set_token_wrong_owner_conflicts() {
        let (db, _dir) = setup().await;
        db.create_social_account(&account(5, "youtube", "current", 100)).await.unwrap();

        let result = db
            .set_token(6, "current", &TokenUpdate::default())
            .await;
        assert!(matches!(result, Err(PostflowError::CasConflict { owner_id: 6 })));
    }

    #[tokio::test]
    async fn test_remove_social_account_checks_owner() {
        let (db, _dir) = setup().await;
        let id = db.create_social_account(&account(5, "tiktok", "tok", 100)).await.unwrap();

        assert!(db.account_belongs_to(5, id).await.unwrap());
        assert!(!db.account_belongs_to(6, id).await.unwrap());

        assert!(!db.remove_social_account(6, id).await.unwrap());
        assert!(db.remove_social_account(5, id).await.unwrap());
        assert!(db.get_social_account(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_posting_history_roundtrip() {
        let (db, _dir) = setup().await;

        db.create_posting_history(&PostingHistory::succeeded(1, 9, 100)).await.unwrap();
        db.create_posting_history(&PostingHistory::failed(1, 9, 101, "boom")).await.unwrap();
        db.create_posting_history(&PostingHistory::succeeded(1, 10, 100)).await.unwrap();

        let rows = db.list_posting_history(9).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].success);
        assert_eq!(rows[0].error_message, "");
        assert!(!rows[1].success);
        assert_eq!(rows[1].error_message, "boom");
    }
}
