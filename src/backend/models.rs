use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Bucket;

/// Columns selected for both the list and the detail view.
pub const POST_COLUMNS: &str =
    "id,title,content,poster_url,author_id,author_avatar_url,author_full_name,created_at";

/// Columns the profile form reads back.
pub const PROFILE_COLUMNS: &str = "full_name,username,avatar_url";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub poster_url: Option<String>,
    pub author_id: Option<String>,
    pub author_avatar_url: Option<String>,
    pub author_full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Media route for the poster image, if the post has one.
    pub fn poster_src(&self) -> Option<String> {
        self.poster_url
            .as_deref()
            .map(|key| Bucket::Posters.media_path(key))
    }

    /// Media route for the author's avatar, if the post has one.
    pub fn avatar_src(&self) -> Option<String> {
        self.author_avatar_url
            .as_deref()
            .map(|key| Bucket::Avatars.media_path(key))
    }

    /// Creation date in the short human form, e.g. `Mon Jan 01 2024`.
    pub fn created_date(&self) -> String {
        self.created_at.format("%a %b %d %Y").to_string()
    }
}

/// The editable part of a profile row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileFields {
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

/// A full `profiles` row as written by an upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: &str, fields: &ProfileFields, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            full_name: fields.full_name.clone(),
            username: fields.username.clone(),
            avatar_url: fields.avatar_url.clone(),
            updated_at,
        }
    }

    pub fn fields(&self) -> ProfileFields {
        ProfileFields {
            full_name: self.full_name.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Companion row written alongside every profile save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserData {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

/// The only parts of the provider's user object this app reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A session issued by the auth provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

/// Sign-up either logs the user in straight away or waits for email confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    Session(AuthSession),
    ConfirmationSent(AuthUser),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}
