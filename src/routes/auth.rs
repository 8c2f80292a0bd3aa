use axum::routing::{get, post};
use axum::Router;

use crate::auth::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/auth/signin",
            get(handlers::signin_page).post(handlers::signin),
        )
        .route(
            "/auth/signup",
            get(handlers::signup_page).post(handlers::signup),
        )
        .route("/auth/signout", post(handlers::signout))
        .route("/auth/oauth/{provider}", get(handlers::oauth_start))
        .route("/auth/callback", get(handlers::oauth_callback))
}
