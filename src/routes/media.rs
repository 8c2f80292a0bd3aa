use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::backend::Bucket;
use crate::extractors::MaybeUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/media/{bucket}/{*key}", get(serve))
}

/// GET /media/{bucket}/{*key} — stream an object out of storage.
/// Failures answer 404 so the page keeps its placeholder.
async fn serve(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let Ok(bucket) = bucket.parse::<Bucket>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state
        .backend
        .download(maybe_user.access_token(), bucket, &key)
        .await
    {
        Ok(blob) => {
            let mime = blob.content_type.unwrap_or_else(|| {
                mime_guess::from_path(&key)
                    .first_or_octet_stream()
                    .to_string()
            });
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime),
                    (header::CACHE_CONTROL, "private, max-age=300".to_string()),
                ],
                blob.data,
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(bucket = %bucket, key = %key, "Error downloading image: {}", e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
