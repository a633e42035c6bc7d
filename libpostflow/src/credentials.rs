//! Token encryption at rest and optimistic token rotation
//!
//! OAuth tokens are stored in `social_accounts` as `base64(nonce || ciphertext)`
//! where the ciphertext is AES-256-GCM output including its 16-byte tag and the
//! nonce is 12 fresh random bytes per encryption.
//!
//! - `TokenCipher`: symmetric encrypt/decrypt with the operator key
//! - `CredentialStore`: couples the cipher with the database so callers never
//!   handle ciphertext directly
//!
//! # Example
//!
//! ```no_run
//! use libpostflow::credentials::TokenCipher;
//! use secrecy::ExposeSecret;
//!
//! # fn example() -> libpostflow::Result<()> {
//! let cipher = TokenCipher::from_key_material("0123456789abcdef0123456789abcdef")?;
//! let stored = cipher.encrypt("ig-access-token")?;
//! let token = cipher.decrypt(&stored)?;
//! assert_eq!(token.expose_secret(), "ig-access-token");
//! # Ok(())
//! # }
//! ```

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::db::Database;
use crate::error::{CryptoError, Result};
use crate::platforms::RefreshedToken;
use crate::types::{NewSocialAccount, SocialAccount, TokenUpdate};

/// Length of the AES-GCM nonce prepended to every ciphertext
pub const NONCE_LEN: usize = 12;

/// Required key length for AES-256
pub const KEY_LEN: usize = 32;

/// AES-256-GCM cipher for token columns
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Create a cipher from a raw 32-byte key
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Create a cipher from operator-provided key material
    ///
    /// Accepts either exactly 32 raw bytes or the standard base64 encoding of
    /// 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` for any other length.
    pub fn from_key_material(material: &str) -> Result<Self> {
        let raw = material.as_bytes();
        if raw.len() == KEY_LEN {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(raw);
            return Ok(Self::new(&key));
        }

        let decoded = Zeroizing::new(STANDARD.decode(material.trim()).map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} raw bytes or base64 of {} bytes",
                KEY_LEN, KEY_LEN
            ))
        })?);

        if decoded.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "decoded key is {} bytes, expected {}",
                decoded.len(),
                KEY_LEN
            ))
            .into());
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&decoded);
        Ok(Self::new(&key))
    }

    /// Encrypt a plaintext token into the column format
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a column value back into a token
    ///
    /// # Errors
    ///
    /// - `CryptoError::Encoding` if the value is not valid base64
    /// - `CryptoError::TooShort` if the decoded value cannot hold a nonce
    /// - `CryptoError::Decryption` on a wrong key or a failed tag check
    pub fn decrypt(&self, stored: &str) -> Result<SecretString> {
        let sealed = STANDARD.decode(stored).map_err(|_| CryptoError::Encoding)?;

        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::TooShort.into());
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::Decryption)?,
        );

        let token = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::Utf8)?;
        Ok(SecretString::from(token.to_string()))
    }
}

/// Encrypted token storage backed by the `social_accounts` table
#[derive(Clone)]
pub struct CredentialStore {
    cipher: TokenCipher,
    db: Database,
}

impl CredentialStore {
    pub fn new(cipher: TokenCipher, db: Database) -> Self {
        Self { cipher, db }
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Decrypt the account's access token
    pub fn access_token(&self, account: &SocialAccount) -> Result<SecretString> {
        self.cipher.decrypt(&account.access_token)
    }

    /// Decrypt the account's refresh token
    pub fn refresh_token(&self, account: &SocialAccount) -> Result<SecretString> {
        self.cipher.decrypt(&account.refresh_token)
    }

    /// Encrypt freshly issued tokens and swap them in
    ///
    /// The swap only applies if the stored access token still equals the
    /// ciphertext in `account`, i.e. nobody rotated it since it was read.
    /// A missing refresh token keeps the stored one.
    ///
    /// # Errors
    ///
    /// Returns `PostflowError::CasConflict` when the stored token changed.
    pub async fn rotate(&self, account: &SocialAccount, refreshed: &RefreshedToken) -> Result<()> {
        let access_token = self.cipher.encrypt(refreshed.access_token.expose_secret())?;
        let refresh_token = match &refreshed.refresh_token {
            Some(token) => Some(self.cipher.encrypt(token.expose_secret())?),
            None => None,
        };

        let update = TokenUpdate {
            access_token: Some(access_token),
            refresh_token,
            expires_at: Some(refreshed.expires_at),
        };

        self.db
            .set_token(account.owner_id, &account.access_token, &update)
            .await
    }

    /// Store a newly linked account, encrypting its tokens first
    pub async fn link_account(&self, account: &NewSocialAccount) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let record = SocialAccount {
            id: 0,
            owner_id: account.owner_id,
            platform: account.platform.clone(),
            external_id: account.external_id.clone(),
            display_name: account.display_name.clone(),
            username: account.username.clone(),
            profile_picture_url: account.profile_picture_url.clone(),
            access_token: self.cipher.encrypt(account.access_token.expose_secret())?,
            refresh_token: self.cipher.encrypt(account.refresh_token.expose_secret())?,
            token_expires_at: account.token_expires_at,
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        };

        self.db.create_social_account(&record).await
    }
}
