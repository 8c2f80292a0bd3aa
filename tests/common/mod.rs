#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tower::ServiceExt;

use folio::auth::session;
use folio::backend::{AuthUser, MemoryBackend, Post};
use folio::config::Config;
use folio::db;
use folio::state::AppState;

/// A router over an in-memory backend and a throwaway SQLite file.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<MemoryBackend>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    pub fn with_backend(backend: MemoryBackend) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("test.db")).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let mut config = Config::default();
        config.profile.save_debounce_ms = 0;

        let backend = Arc::new(backend);
        let state = AppState::new(pool, config, backend.clone());
        Self {
            router: folio::routes::app(state.clone()),
            state,
            backend,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, body: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::post(uri).header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Register an account and return it with a ready-to-send session cookie.
    pub fn signed_in_user(&self, email: &str) -> (AuthUser, String) {
        let user = self.backend.add_account(email, "hunter22");
        let auth = self.backend.issue_session(&user);
        let token = session::create_session(&self.state.db, &auth, 1).unwrap();
        let cookie = format!("{}={}", self.state.config.auth.cookie_name, token);
        (user, cookie)
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `name=value` of the first Set-Cookie header for `name`.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", name)))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
}

pub fn post(id: i64, title: &str, created_at: &str) -> Post {
    Post {
        id,
        title: title.to_string(),
        content: format!("Body of {}", title),
        poster_url: None,
        author_id: None,
        author_avatar_url: None,
        author_full_name: Some("Ada Lovelace".to_string()),
        created_at: created_at.parse::<DateTime<Utc>>().unwrap(),
    }
}
