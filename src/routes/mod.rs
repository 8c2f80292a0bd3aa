pub mod assets;
pub mod auth;
pub mod blog;
pub mod home;
pub mod media;
pub mod profile;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Every page and endpoint, ready to serve.
pub fn app(state: AppState) -> Router {
    let max_avatar_bytes = state.config.profile.max_avatar_bytes;

    Router::new()
        .route("/", get(home::index))
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(blog::router())
        .merge(profile::router(max_avatar_bytes))
        .merge(media::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
