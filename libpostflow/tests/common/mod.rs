//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use libpostflow::credentials::KEY_LEN;
use libpostflow::platforms::mock::MockAdapter;
use libpostflow::types::MediaType;
use libpostflow::{
    AdapterRegistry, CredentialStore, Database, NewPost, NewSocialAccount, PostType, TokenCipher,
};
use secrecy::SecretString;
use tempfile::TempDir;

/// A database in a temp dir plus a credential store over it
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub db: Database,
    pub credentials: CredentialStore,
}

pub async fn setup() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("postflow.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let credentials = CredentialStore::new(TokenCipher::new(&[42u8; KEY_LEN]), db.clone());

    TestEnv {
        temp_dir,
        db,
        credentials,
    }
}

impl TestEnv {
    /// Link an account whose plaintext tokens are `access-<external_id>` and
    /// `refresh-<external_id>`
    pub async fn link(&self, owner_id: i64, platform: &str, external_id: &str, expires_at: i64) -> i64 {
        self.credentials
            .link_account(&NewSocialAccount {
                owner_id,
                platform: platform.to_string(),
                external_id: external_id.to_string(),
                display_name: format!("{} on {}", external_id, platform),
                username: external_id.to_string(),
                profile_picture_url: String::new(),
                access_token: SecretString::from(format!("access-{}", external_id)),
                refresh_token: SecretString::from(format!("refresh-{}", external_id)),
                token_expires_at: expires_at,
            })
            .await
            .unwrap()
    }

    pub async fn create_post(&self, owner_id: i64, account_ids: Vec<i64>) -> i64 {
        self.create_post_with_media(owner_id, PostType::Single, account_ids, Vec::new())
            .await
    }

    pub async fn create_post_with_media(
        &self,
        owner_id: i64,
        post_type: PostType,
        account_ids: Vec<i64>,
        media_ids: Vec<i64>,
    ) -> i64 {
        self.db
            .create_post(&NewPost {
                owner_id,
                post_type,
                caption: "Launch day\nMore details inside".to_string(),
                title: String::new(),
                scheduled_time: chrono::Utc::now().timestamp(),
                account_ids,
                media_ids,
            })
            .await
            .unwrap()
    }

    pub async fn create_media(&self, owner_id: i64, count: usize) -> Vec<i64> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = self
                .db
                .create_media_asset(owner_id, &format!("https://cdn.example.com/{}.jpg", i), MediaType::Image)
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }
}

/// Registry holding clones of the given mocks; the clones share call counters
pub fn registry(adapters: &[&MockAdapter]) -> Arc<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(Arc::new((*adapter).clone()));
    }
    Arc::new(registry)
}
