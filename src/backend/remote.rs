use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::models::{POST_COLUMNS, PROFILE_COLUMNS};
use super::{
    AuthProvider, AuthSession, AuthUser, BackendError, BackendResult, Blob, Bucket, Credentials,
    OAuthProvider, ObjectStore, Post, Profile, ProfileFields, SignUpOutcome, Tables, UserData,
};
use crate::config::BackendConfig;

/// Client for the hosted REST surface (`rest/v1`, `storage/v1`, `auth/v1`).
#[derive(Clone)]
pub struct RemoteBackend {
    http: Client,
    base: Url,
    anon_key: String,
}

/// Token payload returned by every `auth/v1/token` grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            user: token.user,
        }
    }
}

impl RemoteBackend {
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base: Url::parse(&config.url)?,
            anon_key: config.anon_key.clone(),
        })
    }

    /// Build `<base>/<segments...>`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &str, query: &[(&str, &str)]) -> BackendResult<Url> {
        let mut url = self.endpoint(&["rest", "v1", table])?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    fn object_url(&self, bucket: Bucket, key: &str) -> BackendResult<Url> {
        let mut segments = vec!["storage", "v1", "object", bucket.as_str()];
        segments.extend(key.split('/').filter(|s| !s.is_empty()));
        self.endpoint(&segments)
    }

    fn token_url(&self, grant_type: &str) -> BackendResult<Url> {
        let mut url = self.endpoint(&["auth", "v1", "token"])?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }

    /// Attach the project key plus the caller's bearer token (anon key when signed out).
    fn authed(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let bearer = access_token.unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        access_token: Option<&str>,
        url: Url,
    ) -> BackendResult<Vec<T>> {
        let response = self
            .authed(self.http.get(url), access_token)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn upsert<T: serde::Serialize + Sync>(
        &self,
        access_token: &str,
        table: &str,
        row: &T,
    ) -> BackendResult<()> {
        let url = self.table_url(table, &[])?;
        let response = self
            .authed(self.http.post(url), Some(access_token))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> BackendResult<AuthSession> {
        let url = self.token_url(grant_type)?;
        let response = self
            .authed(self.http.post(url), None)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        Ok(token.into())
    }
}

/// Turn a non-success response into `BackendError::Status` carrying the
/// provider's own message.
async fn check(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Pull a human readable message out of a PostgREST, storage or auth error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Tables for RemoteBackend {
    async fn list_posts(&self, access_token: Option<&str>) -> BackendResult<Vec<Post>> {
        let url = self.table_url(
            "posts",
            &[("select", POST_COLUMNS), ("order", "created_at.desc")],
        )?;
        self.select(access_token, url).await
    }

    async fn post_by_id(
        &self,
        access_token: Option<&str>,
        id: i64,
    ) -> BackendResult<Option<Post>> {
        let filter = format!("eq.{}", id);
        let url = self.table_url("posts", &[("select", POST_COLUMNS), ("id", &filter)])?;
        let rows: Vec<Post> = self.select(access_token, url).await?;
        Ok(rows.into_iter().next())
    }

    async fn profile(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> BackendResult<Option<ProfileFields>> {
        let filter = format!("eq.{}", user_id);
        let url = self.table_url("profiles", &[("select", PROFILE_COLUMNS), ("id", &filter)])?;
        let rows: Vec<ProfileFields> = self.select(Some(access_token), url).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_profile(&self, access_token: &str, profile: &Profile) -> BackendResult<()> {
        self.upsert(access_token, "profiles", profile).await
    }

    async fn upsert_user_data(&self, access_token: &str, row: &UserData) -> BackendResult<()> {
        self.upsert(access_token, "user_data", row).await
    }
}

#[async_trait]
impl ObjectStore for RemoteBackend {
    async fn download(
        &self,
        access_token: Option<&str>,
        bucket: Bucket,
        key: &str,
    ) -> BackendResult<Blob> {
        let url = self.object_url(bucket, key)?;
        let response = self
            .authed(self.http.get(url), access_token)
            .send()
            .await?;
        let response = check(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await?;
        Ok(Blob { content_type, data })
    }

    async fn upload(
        &self,
        access_token: &str,
        bucket: Bucket,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let url = self.object_url(bucket, key)?;
        let response = self
            .authed(self.http.post(url), Some(access_token))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for RemoteBackend {
    async fn sign_in_with_password(&self, credentials: &Credentials) -> BackendResult<AuthSession> {
        self.grant("password", serde_json::to_value(credentials)?)
            .await
    }

    async fn sign_up(&self, credentials: &Credentials) -> BackendResult<SignUpOutcome> {
        let url = self.endpoint(&["auth", "v1", "signup"])?;
        let response = self
            .authed(self.http.post(url), None)
            .json(credentials)
            .send()
            .await?;
        let body: serde_json::Value = check(response).await?.json().await?;

        // With auto-confirm the provider answers with a full token payload,
        // otherwise with the bare (unconfirmed) user.
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            Ok(SignUpOutcome::Session(token.into()))
        } else {
            let user: AuthUser = serde_json::from_value(body)?;
            Ok(SignUpOutcome::ConfirmationSent(user))
        }
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let url = self.endpoint(&["auth", "v1", "logout"])?;
        let response = self
            .authed(self.http.post(url), Some(access_token))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<AuthSession> {
        self.grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> BackendResult<Url> {
        let mut url = self.endpoint(&["auth", "v1", "authorize"])?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> BackendResult<AuthSession> {
        self.grant(
            "pkce",
            serde_json::json!({ "auth_code": code, "code_verifier": code_verifier }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> RemoteBackend {
        RemoteBackend::new(&BackendConfig {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn table_url_carries_select_and_filter() {
        let url = backend("https://project.example.co")
            .table_url("posts", &[("select", "id,title"), ("id", "eq.3")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.example.co/rest/v1/posts?select=id%2Ctitle&id=eq.3"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let url = backend("http://localhost:54321/base/")
            .endpoint(&["auth", "v1", "signup"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:54321/base/auth/v1/signup");
    }

    #[test]
    fn object_url_splits_nested_keys() {
        let url = backend("https://project.example.co")
            .object_url(Bucket::Posters, "2024/launch day.png")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.example.co/storage/v1/object/posters/2024/launch%20day.png"
        );
    }

    #[test]
    fn authorize_url_requests_pkce() {
        let url = backend("https://project.example.co")
            .authorize_url(
                OAuthProvider::Google,
                "http://localhost:3000/auth/callback",
                "challenge",
            )
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".into(), "google".into())));
        assert!(pairs.contains(&("code_challenge".into(), "challenge".into())));
        assert!(pairs.contains(&("code_challenge_method".into(), "s256".into())));
        assert!(pairs.contains(&(
            "redirect_to".into(),
            "http://localhost:3000/auth/callback".into()
        )));
    }

    #[test]
    fn error_message_reads_provider_fields() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(
            error_message(r#"{"code":"23505","message":"duplicate key"}"#),
            "duplicate key"
        );
        assert_eq!(error_message("upstream timeout\n"), "upstream timeout");
    }

    #[test]
    fn token_response_becomes_session() {
        let token: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": { "id": "u1", "email": "ada@example.com", "aud": "authenticated" }
        }))
        .unwrap();
        let session: AuthSession = token.into();
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.user.email.as_deref(), Some("ada@example.com"));
        assert!(session.expires_at > Utc::now());
    }
}
