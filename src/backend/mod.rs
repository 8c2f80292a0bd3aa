//! Client side of the hosted backend: relational tables, object storage and
//! the auth provider.
//!
//! Handlers only see the three traits below. `RemoteBackend` speaks the hosted
//! REST surface; `MemoryBackend` keeps everything in process for tests and
//! local development.

pub mod memory;
pub mod models;
pub mod remote;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;

pub use self::memory::MemoryBackend;
pub use self::models::{
    AuthSession, AuthUser, Credentials, Post, Profile, ProfileFields, SignUpOutcome, UserData,
};
pub use self::remote::RemoteBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Not found")]
    NotFound,
}

impl BackendError {
    /// Message suitable for showing to the user, as worded by the provider.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Status { message, .. } => message.clone(),
            BackendError::NotFound => "Not found".to_string(),
            _ => "Service unavailable".to_string(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Object storage buckets used by the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Avatars,
    Posters,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::Posters => "posters",
        }
    }

    /// Path of the local route that serves an object from this bucket.
    /// Each `/`-separated part of the key is percent-encoded.
    pub fn media_path(&self, key: &str) -> String {
        let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
        format!("/media/{}/{}", self.as_str(), encoded.join("/"))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avatars" => Ok(Bucket::Avatars),
            "posters" => Ok(Bucket::Posters),
            _ => Err(BackendError::NotFound),
        }
    }
}

/// A downloaded object.
#[derive(Debug, Clone)]
pub struct Blob {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// OAuth providers the sign-in page offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(OAuthProvider::Google),
            _ => Err(BackendError::NotFound),
        }
    }
}

/// Relational tables. `access_token` is the signed-in user's token, or `None`
/// to query with the anonymous key.
#[async_trait]
pub trait Tables: Send + Sync {
    /// All posts, newest first.
    async fn list_posts(&self, access_token: Option<&str>) -> BackendResult<Vec<Post>>;

    /// A single post, `None` when no row has this id.
    async fn post_by_id(&self, access_token: Option<&str>, id: i64)
        -> BackendResult<Option<Post>>;

    /// At most one profile row for `user_id`.
    async fn profile(&self, access_token: &str, user_id: &str)
        -> BackendResult<Option<ProfileFields>>;

    async fn upsert_profile(&self, access_token: &str, profile: &Profile) -> BackendResult<()>;

    async fn upsert_user_data(&self, access_token: &str, row: &UserData) -> BackendResult<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(
        &self,
        access_token: Option<&str>,
        bucket: Bucket,
        key: &str,
    ) -> BackendResult<Blob>;

    async fn upload(
        &self,
        access_token: &str,
        bucket: Bucket,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> BackendResult<()>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(&self, credentials: &Credentials) -> BackendResult<AuthSession>;

    async fn sign_up(&self, credentials: &Credentials) -> BackendResult<SignUpOutcome>;

    /// Revoke the provider session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    async fn refresh(&self, refresh_token: &str) -> BackendResult<AuthSession>;

    /// URL the browser is sent to for an OAuth sign-in.
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<url::Url>;

    /// Trade an OAuth authorization code and its PKCE verifier for a session.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> BackendResult<AuthSession>;
}

/// Everything the app needs from the hosted backend.
pub trait Backend: Tables + ObjectStore + AuthProvider {}

impl<T: Tables + ObjectStore + AuthProvider> Backend for T {}
