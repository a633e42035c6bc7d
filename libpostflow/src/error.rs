//! Error types for Postflow

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostflowError>;

#[derive(Error, Debug)]
pub enum PostflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The stored access token no longer matches the value the caller read.
    #[error("Token changed concurrently for owner {owner_id}")]
    CasConflict { owner_id: i64 },
}

impl PostflowError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostflowError::Validation(_) => 3,
            PostflowError::Queue(QueueError::Decode(_)) => 3,
            PostflowError::Config(_) => 2,
            _ => 1,
        }
    }

    /// Whether redelivering the task that produced this error can never succeed.
    ///
    /// Terminal failures are buried instead of retried by the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostflowError::Validation(_)
                | PostflowError::Queue(QueueError::Decode(_))
                | PostflowError::Queue(QueueError::UnknownTaskType(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unexpected column value: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Publishing failed: {0}")]
    Publishing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported platform: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for PlatformError {
    /// The request URL is dropped; query strings may carry tokens.
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            PlatformError::InvalidResponse(err.to_string())
        } else {
            PlatformError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for PostflowError {
    fn from(err: reqwest::Error) -> Self {
        PostflowError::Platform(err.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Ciphertext is not valid base64")]
    Encoding,

    #[error("Ciphertext too short")]
    TooShort,

    #[error("Decryption failed")]
    Decryption,

    #[error("Encryption failed")]
    Encryption,

    #[error("Decrypted token is not valid UTF-8")]
    Utf8,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to decode task payload: {0}")]
    Decode(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Failed to submit task: {0}")]
    Submit(String),
}
