use askama::Template;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;

use crate::backend::Post;
use crate::extractors::MaybeUser;
use crate::routes::home::Html;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/blog.html")]
pub struct BlogTemplate {
    pub signed_in: bool,
    pub posts: Vec<Post>,
    pub load_failed: bool,
}

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub signed_in: bool,
    pub post: Option<Post>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blog", get(list))
        .route("/blog/posts/{id}", get(detail))
}

/// GET /blog — every post as a summary card, newest first
async fn list(State(state): State<AppState>, maybe_user: MaybeUser) -> Html<BlogTemplate> {
    let (posts, load_failed) = match state.backend.list_posts(maybe_user.access_token()).await {
        Ok(posts) => (posts, false),
        Err(e) => {
            tracing::error!("Failed to list posts: {}", e);
            (Vec::new(), true)
        }
    };

    Html(BlogTemplate {
        signed_in: maybe_user.0.is_some(),
        posts,
        load_failed,
    })
}

/// GET /blog/posts/{id} — a single post; an unknown id renders an empty card
async fn detail(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<i64>,
) -> Html<PostTemplate> {
    let post = match state
        .backend
        .post_by_id(maybe_user.access_token(), id)
        .await
    {
        Ok(post) => post,
        Err(e) => {
            tracing::error!(post_id = id, "Failed to load post: {}", e);
            None
        }
    };

    if post.is_none() {
        tracing::debug!(post_id = id, "No post with this id");
    }

    Html(PostTemplate {
        signed_in: maybe_user.0.is_some(),
        post,
    })
}
