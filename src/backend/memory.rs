use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use url::Url;

use super::{
    AuthProvider, AuthSession, AuthUser, BackendError, BackendResult, Blob, Bucket, Credentials,
    OAuthProvider, ObjectStore, Post, Profile, ProfileFields, SignUpOutcome, Tables, UserData,
};
use crate::auth::oauth::code_challenge;

/// One upsert as seen by the backend, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRecord {
    pub table: &'static str,
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

struct Account {
    password: String,
    user: AuthUser,
}

struct PendingCode {
    challenge: String,
    user: AuthUser,
}

#[derive(Default)]
struct Inner {
    posts: Vec<Post>,
    profiles: HashMap<String, Profile>,
    user_data: HashMap<String, UserData>,
    objects: HashMap<(Bucket, String), Blob>,
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, (AuthUser, DateTime<Utc>)>,
    refresh_tokens: HashMap<String, AuthUser>,
    oauth_codes: HashMap<String, PendingCode>,
    upserts: Vec<UpsertRecord>,
    downloads: Vec<(Bucket, String)>,
    failing_tables: Vec<&'static str>,
    failing_profile_reads: bool,
    revoked: Vec<String>,
}

/// In-process stand-in for the hosted backend.
///
/// Behaves like the hosted service for the calls this app makes: row-level
/// checks on profile writes, PKCE verification on code exchange, token
/// expiry. Also records every upsert and download for assertions.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    token_ttl: Duration,
    auto_confirm: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            token_ttl: Duration::hours(1),
            auto_confirm: true,
        }
    }

    /// Lifetime of issued access tokens. A negative value issues tokens that
    /// are already expired.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// When false, sign-up returns the bare user and no session.
    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_post(&self, post: Post) {
        self.lock().posts.push(post);
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn insert_object(&self, bucket: Bucket, key: &str, content_type: &str, data: &[u8]) {
        self.lock().objects.insert(
            (bucket, key.to_string()),
            Blob {
                content_type: Some(content_type.to_string()),
                data: Bytes::copy_from_slice(data),
            },
        );
    }

    /// Register an account that can sign in with a password.
    pub fn add_account(&self, email: &str, password: &str) -> AuthUser {
        let user = AuthUser {
            id: uuid::Uuid::now_v7().to_string(),
            email: Some(email.to_string()),
        };
        self.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Issue a session directly, as if the user had signed in.
    pub fn issue_session(&self, user: &AuthUser) -> AuthSession {
        let mut inner = self.lock();
        self.new_session(&mut inner, user.clone())
    }

    /// Pretend the provider redirected back with `code` for a flow that sent
    /// `challenge`.
    pub fn grant_oauth_code(&self, code: &str, challenge: &str, user: AuthUser) {
        self.lock().oauth_codes.insert(
            code.to_string(),
            PendingCode {
                challenge: challenge.to_string(),
                user,
            },
        );
    }

    /// Make every subsequent upsert into `table` fail.
    pub fn fail_upserts_to(&self, table: &'static str) {
        self.lock().failing_tables.push(table);
    }

    /// Make every subsequent profile read fail as if the service were down.
    pub fn fail_profile_reads(&self) {
        self.lock().failing_profile_reads = true;
    }

    pub fn upserts(&self) -> Vec<UpsertRecord> {
        self.lock().upserts.clone()
    }

    pub fn downloads(&self) -> Vec<(Bucket, String)> {
        self.lock().downloads.clone()
    }

    pub fn stored_profile(&self, id: &str) -> Option<Profile> {
        self.lock().profiles.get(id).cloned()
    }

    pub fn stored_user_data(&self, id: &str) -> Option<UserData> {
        self.lock().user_data.get(id).cloned()
    }

    pub fn has_object(&self, bucket: Bucket, key: &str) -> bool {
        self.lock().objects.contains_key(&(bucket, key.to_string()))
    }

    pub fn object_keys(&self, bucket: Bucket) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| *b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Access tokens passed to `sign_out`.
    pub fn revoked_tokens(&self) -> Vec<String> {
        self.lock().revoked.clone()
    }

    fn new_session(&self, inner: &mut Inner, user: AuthUser) -> AuthSession {
        let access_token = format!("access-{}", uuid::Uuid::now_v7());
        let refresh_token = format!("refresh-{}", uuid::Uuid::now_v7());
        let expires_at = Utc::now() + self.token_ttl;
        inner
            .access_tokens
            .insert(access_token.clone(), (user.clone(), expires_at));
        inner.refresh_tokens.insert(refresh_token.clone(), user.clone());
        AuthSession {
            access_token,
            refresh_token,
            expires_at,
            user,
        }
    }

    fn user_for(inner: &Inner, access_token: &str) -> BackendResult<AuthUser> {
        match inner.access_tokens.get(access_token) {
            Some((user, expires_at)) if *expires_at > Utc::now() => Ok(user.clone()),
            Some(_) => Err(unauthorized("JWT expired")),
            None => Err(unauthorized("Invalid JWT")),
        }
    }

    fn record_upsert(
        inner: &mut Inner,
        table: &'static str,
        access_token: &str,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let user = Self::user_for(inner, access_token)?;
        inner.upserts.push(UpsertRecord {
            table,
            id: id.to_string(),
            updated_at,
        });
        if inner.failing_tables.contains(&table) {
            return Err(BackendError::Status {
                status: 500,
                message: format!("upsert into {} failed", table),
            });
        }
        if user.id != id {
            return Err(BackendError::Status {
                status: 403,
                message: format!("new row violates row-level security policy for table \"{}\"", table),
            });
        }
        Ok(())
    }
}

fn unauthorized(message: &str) -> BackendError {
    BackendError::Status {
        status: 401,
        message: message.to_string(),
    }
}

#[async_trait]
impl Tables for MemoryBackend {
    async fn list_posts(&self, _access_token: Option<&str>) -> BackendResult<Vec<Post>> {
        let mut posts = self.lock().posts.clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn post_by_id(
        &self,
        _access_token: Option<&str>,
        id: i64,
    ) -> BackendResult<Option<Post>> {
        Ok(self.lock().posts.iter().find(|p| p.id == id).cloned())
    }

    async fn profile(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> BackendResult<Option<ProfileFields>> {
        let inner = self.lock();
        Self::user_for(&inner, access_token)?;
        if inner.failing_profile_reads {
            return Err(BackendError::Status {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }
        Ok(inner.profiles.get(user_id).map(Profile::fields))
    }

    async fn upsert_profile(&self, access_token: &str, profile: &Profile) -> BackendResult<()> {
        let mut inner = self.lock();
        Self::record_upsert(
            &mut inner,
            "profiles",
            access_token,
            &profile.id,
            profile.updated_at,
        )?;
        inner.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn upsert_user_data(&self, access_token: &str, row: &UserData) -> BackendResult<()> {
        let mut inner = self.lock();
        Self::record_upsert(&mut inner, "user_data", access_token, &row.id, row.updated_at)?;
        inner.user_data.insert(row.id.clone(), row.clone());
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn download(
        &self,
        _access_token: Option<&str>,
        bucket: Bucket,
        key: &str,
    ) -> BackendResult<Blob> {
        let mut inner = self.lock();
        inner.downloads.push((bucket, key.to_string()));
        inner
            .objects
            .get(&(bucket, key.to_string()))
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn upload(
        &self,
        access_token: &str,
        bucket: Bucket,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let mut inner = self.lock();
        Self::user_for(&inner, access_token)?;
        let slot = (bucket, key.to_string());
        if inner.objects.contains_key(&slot) {
            return Err(BackendError::Status {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }
        inner.objects.insert(
            slot,
            Blob {
                content_type: Some(content_type.to_string()),
                data,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_in_with_password(&self, credentials: &Credentials) -> BackendResult<AuthSession> {
        let mut inner = self.lock();
        let user = match inner.accounts.get(&credentials.email) {
            Some(account) if account.password == credentials.password => account.user.clone(),
            _ => {
                return Err(BackendError::Status {
                    status: 400,
                    message: "Invalid login credentials".to_string(),
                })
            }
        };
        Ok(self.new_session(&mut inner, user))
    }

    async fn sign_up(&self, credentials: &Credentials) -> BackendResult<SignUpOutcome> {
        if credentials.password.len() < 6 {
            return Err(BackendError::Status {
                status: 422,
                message: "Password should be at least 6 characters.".to_string(),
            });
        }
        if self.lock().accounts.contains_key(&credentials.email) {
            return Err(BackendError::Status {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        let user = self.add_account(&credentials.email, &credentials.password);
        if self.auto_confirm {
            let mut inner = self.lock();
            Ok(SignUpOutcome::Session(self.new_session(&mut inner, user)))
        } else {
            Ok(SignUpOutcome::ConfirmationSent(user))
        }
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let mut inner = self.lock();
        inner.revoked.push(access_token.to_string());
        inner.access_tokens.remove(access_token);
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        let mut inner = self.lock();
        let user = inner.refresh_tokens.remove(refresh_token).ok_or_else(|| {
            BackendError::Status {
                status: 400,
                message: "Invalid Refresh Token: Refresh Token Not Found".to_string(),
            }
        })?;
        Ok(self.new_session(&mut inner, user))
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<Url> {
        let mut url = Url::parse("memory://auth/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> BackendResult<AuthSession> {
        let mut inner = self.lock();
        let pending = inner.oauth_codes.remove(code).ok_or_else(|| BackendError::Status {
            status: 400,
            message: "invalid flow state, no valid flow state found".to_string(),
        })?;
        if code_challenge(code_verifier) != pending.challenge {
            return Err(BackendError::Status {
                status: 400,
                message: "code challenge does not match previously saved code verifier"
                    .to_string(),
            });
        }
        Ok(self.new_session(&mut inner, pending.user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn password_sign_in_checks_credentials() {
        let backend = MemoryBackend::new();
        backend.add_account("ada@example.com", "hunter22");

        let session = backend
            .sign_in_with_password(&credentials("ada@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(session.user.email.as_deref(), Some("ada@example.com"));

        let err = backend
            .sign_in_with_password(&credentials("ada@example.com", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Invalid login credentials");
    }

    #[tokio::test]
    async fn profile_upsert_for_another_user_is_rejected() {
        let backend = MemoryBackend::new();
        let user = backend.add_account("ada@example.com", "hunter22");
        let session = backend.issue_session(&user);

        let foreign = Profile::new("someone-else", &ProfileFields::default(), Utc::now());
        assert!(backend
            .upsert_profile(&session.access_token, &foreign)
            .await
            .is_err());
        assert!(backend.stored_profile("someone-else").is_none());
    }

    #[tokio::test]
    async fn expired_tokens_cannot_read_profiles() {
        let backend = MemoryBackend::new().with_token_ttl(Duration::seconds(-1));
        let user = backend.add_account("ada@example.com", "hunter22");
        let session = backend.issue_session(&user);

        let err = backend
            .profile(&session.access_token, &user.id)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "JWT expired");
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let backend = MemoryBackend::new();
        let user = backend.add_account("ada@example.com", "hunter22");
        let session = backend.issue_session(&user);

        assert!(backend.refresh(&session.refresh_token).await.is_ok());
        assert!(backend.refresh(&session.refresh_token).await.is_err());
    }

    #[test]
    fn uploads_do_not_overwrite() {
        let backend = MemoryBackend::new();
        let user = backend.add_account("ada@example.com", "hunter22");
        let session = backend.issue_session(&user);

        tokio_test::block_on(async {
            let first = backend
                .upload(
                    &session.access_token,
                    Bucket::Avatars,
                    "a.png",
                    "image/png",
                    Bytes::from_static(b"png"),
                )
                .await;
            assert!(first.is_ok());
            let second = backend
                .upload(
                    &session.access_token,
                    Bucket::Avatars,
                    "a.png",
                    "image/png",
                    Bytes::from_static(b"png"),
                )
                .await;
            assert!(second.is_err());
        });
    }

    #[test]
    fn exchange_code_verifies_pkce() {
        let backend = MemoryBackend::new();
        let user = AuthUser {
            id: "u1".into(),
            email: None,
        };
        backend.grant_oauth_code("code", &code_challenge("verifier"), user);

        tokio_test::block_on(async {
            assert!(backend.exchange_code("code", "other").await.is_err());
        });

        // The failed attempt consumed the code.
        backend.grant_oauth_code(
            "code",
            &code_challenge("verifier"),
            AuthUser {
                id: "u1".into(),
                email: None,
            },
        );
        let session = tokio_test::block_on(backend.exchange_code("code", "verifier")).unwrap();
        assert_eq!(session.user.id, "u1");
    }
}
