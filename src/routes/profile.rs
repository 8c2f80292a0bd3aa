use askama::Template;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use bytes::Bytes;
use serde::Deserialize;

use crate::backend::{Bucket, ProfileFields};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::profile::{Notice, ProfileSync};
use crate::routes::home::Html;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub signed_in: bool,
    pub email: String,
    pub full_name: String,
    pub username: String,
    pub avatar_src: Option<String>,
    pub notice: Option<&'static str>,
    pub notice_is_error: bool,
}

impl ProfileTemplate {
    fn from_sync(user: &CurrentUser, sync: &ProfileSync) -> Self {
        let ProfileFields {
            full_name,
            username,
            avatar_url,
        } = sync.draft();
        let notice = sync.notice();
        Self {
            signed_in: true,
            email: user.email.clone().unwrap_or_default(),
            full_name: full_name.clone().unwrap_or_default(),
            username: username.clone().unwrap_or_else(|| "@".to_string()),
            avatar_src: avatar_url
                .as_deref()
                .map(|key| Bucket::Avatars.media_path(key)),
            notice: notice.map(|n| n.message()),
            notice_is_error: notice.is_some_and(|n| n.is_error()),
        }
    }
}

#[derive(Deserialize)]
pub struct ProfileForm {
    pub full_name: Option<String>,
    pub username: Option<String>,
}

/// An avatar file pulled out of the multipart body.
struct AvatarUpload {
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

pub fn router(max_avatar_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/profile", get(show).post(update))
        .route(
            "/profile/avatar",
            // Room for the text fields that travel with the file.
            post(upload_avatar).layer(DefaultBodyLimit::max(max_avatar_bytes + 64 * 1024)),
        )
}

fn signin_redirect() -> Response {
    Redirect::to("/auth/signin").into_response()
}

/// GET /profile — load the profile into the form
async fn show(State(state): State<AppState>, maybe_user: MaybeUser) -> Response {
    let Some(user) = maybe_user.0 else {
        return signin_redirect();
    };

    let mut sync = ProfileSync::new(&user);
    sync.load(state.backend.as_ref()).await;

    Html(ProfileTemplate::from_sync(&user, &sync)).into_response()
}

/// POST /profile — save the submitted fields
async fn update(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Form(form): Form<ProfileForm>,
) -> Response {
    let Some(user) = maybe_user.0 else {
        return signin_redirect();
    };

    let mut sync = ProfileSync::new(&user);
    sync.load(state.backend.as_ref()).await;
    sync.edit_full_name(form.full_name);
    sync.edit_username(form.username);
    sync.save(&state.profile_saver).await;

    Html(ProfileTemplate::from_sync(&user, &sync)).into_response()
}

/// POST /profile/avatar — store the new image, then save it on the profile
async fn upload_avatar(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(user) = maybe_user.0 else {
        return Ok(signin_redirect());
    };

    let mut form = ProfileForm {
        full_name: None,
        username: None,
    };
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("full_name") => form.full_name = Some(field_text(field).await?),
            Some("username") => form.username = Some(field_text(field).await?),
            Some("avatar") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?;
                upload = Some(AvatarUpload {
                    file_name,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let mut sync = ProfileSync::new(&user);
    sync.load(state.backend.as_ref()).await;
    // Keep what the user typed on screen; the avatar save does not commit it.
    sync.edit_full_name(form.full_name);
    sync.edit_username(form.username);

    // Without the stored row there is nothing safe to save the key with.
    if !sync.is_loaded() {
        return Ok(Html(ProfileTemplate::from_sync(&user, &sync)).into_response());
    }

    match upload.filter(|u| !u.data.is_empty()) {
        None => sync.report(Notice::NoAvatarSelected),
        Some(upload) => match store_avatar(&state, &user, upload).await {
            Ok(key) => {
                sync.avatar_uploaded(key, &state.profile_saver).await;
            }
            Err(notice) => sync.report(notice),
        },
    }

    Ok(Html(ProfileTemplate::from_sync(&user, &sync)).into_response())
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))
}

/// Validate and upload an avatar, returning its storage key.
async fn store_avatar(
    state: &AppState,
    user: &CurrentUser,
    upload: AvatarUpload,
) -> Result<String, Notice> {
    if upload.data.len() > state.config.profile.max_avatar_bytes {
        tracing::warn!(user_id = %user.id, size = upload.data.len(), "Avatar too large");
        return Err(Notice::UploadFailed);
    }

    let content_type = upload
        .content_type
        .clone()
        .or_else(|| {
            upload
                .file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|mime| mime.to_string())
        })
        .unwrap_or_default();
    if !content_type.starts_with("image/") {
        tracing::warn!(user_id = %user.id, content_type = %content_type, "Rejected non-image avatar");
        return Err(Notice::UploadFailed);
    }

    let key = avatar_key(&user.id, upload.file_name.as_deref(), &content_type);
    state
        .backend
        .upload(
            &user.access_token,
            Bucket::Avatars,
            &key,
            &content_type,
            upload.data,
        )
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.id, "Avatar upload failed: {}", e);
            Notice::UploadFailed
        })?;

    tracing::info!(user_id = %user.id, key = %key, "Avatar uploaded");
    Ok(key)
}

/// `<user id>-<random>.<ext>`, with the extension taken from the file name
/// or, failing that, the content type.
fn avatar_key(user_id: &str, file_name: Option<&str>, content_type: &str) -> String {
    let ext = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "img".to_string());
    format!("{}-{}.{}", user_id, uuid::Uuid::now_v7().simple(), ext)
}
