mod common;

use axum::http::StatusCode;
use common::{body_text, location, set_cookie, TestApp};
use folio::auth::oauth::code_challenge;
use folio::auth::session;
use folio::backend::MemoryBackend;

const COOKIE: &str = "folio_session";

#[tokio::test]
async fn signin_page_offers_google_when_enabled() {
    let app = TestApp::new();
    let response = app.get("/auth/signin", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("action=\"/auth/signin\""));
    assert!(body.contains("href=\"/auth/oauth/google\""));
}

#[tokio::test]
async fn signin_page_shows_error_from_query() {
    let app = TestApp::new();
    let body = body_text(app.get("/auth/signin?error=Invalid+login+credentials", None).await).await;
    assert!(body.contains("Invalid login credentials"));
}

#[tokio::test]
async fn signin_sets_session_cookie_and_redirects_to_profile() {
    let app = TestApp::new();
    app.backend.add_account("ada@example.com", "hunter22");

    let response = app
        .post_form(
            "/auth/signin",
            "email=ada%40example.com&password=hunter22",
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/profile");
    let cookie = set_cookie(&response, COOKIE).expect("session cookie set");
    let token = cookie.trim_start_matches("folio_session=");
    assert!(session::find_session(&app.state.db, token).unwrap().is_some());
}

#[tokio::test]
async fn signin_with_wrong_password_redirects_with_error() {
    let app = TestApp::new();
    app.backend.add_account("ada@example.com", "hunter22");

    let response = app
        .post_form(
            "/auth/signin",
            "email=ada%40example.com&password=wrong",
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        "/auth/signin?error=Invalid+login+credentials"
    );
    assert!(set_cookie(&response, COOKIE).is_none());
}

#[tokio::test]
async fn signin_with_blank_fields_is_refused_locally() {
    let app = TestApp::new();
    let response = app
        .post_form("/auth/signin", "email=+&password=", None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/auth/signin?error="));
}

#[tokio::test]
async fn signup_with_auto_confirm_starts_a_session() {
    let app = TestApp::new();
    let response = app
        .post_form(
            "/auth/signup",
            "email=grace%40example.com&password=hunter22",
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/profile");
    assert!(set_cookie(&response, COOKIE).is_some());
}

#[tokio::test]
async fn signup_awaiting_confirmation_redirects_with_notice() {
    let app = TestApp::with_backend(MemoryBackend::new().with_auto_confirm(false));
    let response = app
        .post_form(
            "/auth/signup",
            "email=grace%40example.com&password=hunter22",
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/auth/signin?notice="));
    assert!(set_cookie(&response, COOKIE).is_none());
}

#[tokio::test]
async fn signup_with_short_password_shows_provider_message() {
    let app = TestApp::new();
    let response = app
        .post_form(
            "/auth/signup",
            "email=grace%40example.com&password=abc",
            None,
        )
        .await;

    assert!(location(&response).starts_with("/auth/signup?error=Password+should+be"));
}

#[tokio::test]
async fn signout_clears_session_and_revokes_token() {
    let app = TestApp::new();
    let (_, cookie) = app.signed_in_user("ada@example.com");
    let token = cookie.trim_start_matches("folio_session=").to_string();
    let access_token = session::find_session(&app.state.db, &token)
        .unwrap()
        .unwrap()
        .access_token;

    let response = app.post_form("/auth/signout", "", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/auth/signin");
    assert_eq!(set_cookie(&response, COOKIE).as_deref(), Some("folio_session="));
    assert!(session::find_session(&app.state.db, &token).unwrap().is_none());
    assert_eq!(app.backend.revoked_tokens(), vec![access_token]);

    // The old cookie no longer opens the profile.
    let response = app.get("/profile", Some(&cookie)).await;
    assert_eq!(location(&response), "/auth/signin");
}

#[tokio::test]
async fn signout_without_session_still_redirects() {
    let app = TestApp::new();
    let response = app.post_form("/auth/signout", "", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/auth/signin");
    assert!(app.backend.revoked_tokens().is_empty());
}

#[tokio::test]
async fn expired_access_token_is_refreshed() {
    let app = TestApp::with_backend(
        MemoryBackend::new().with_token_ttl(chrono::Duration::seconds(-1)),
    );
    let (_, cookie) = app.signed_in_user("ada@example.com");
    let token = cookie.trim_start_matches("folio_session=").to_string();
    let before = session::find_session(&app.state.db, &token)
        .unwrap()
        .unwrap();

    let response = app.get("/blog", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let after = session::find_session(&app.state.db, &token)
        .unwrap()
        .unwrap();
    assert_ne!(after.access_token, before.access_token);
    assert_ne!(after.refresh_token, before.refresh_token);
}

#[tokio::test]
async fn failed_refresh_drops_the_session() {
    let app = TestApp::with_backend(
        MemoryBackend::new().with_token_ttl(chrono::Duration::seconds(-1)),
    );
    let user = app.backend.add_account("ada@example.com", "hunter22");
    let mut auth = app.backend.issue_session(&user);
    auth.refresh_token = "refresh-unknown".to_string();
    let token = session::create_session(&app.state.db, &auth, 1).unwrap();
    let cookie = format!("folio_session={}", token);

    let response = app.get("/profile", Some(&cookie)).await;
    assert_eq!(location(&response), "/auth/signin");
    assert!(session::find_session(&app.state.db, &token).unwrap().is_none());
}

#[tokio::test]
async fn oauth_flow_round_trip() {
    let app = TestApp::new();

    let start = app.get("/auth/oauth/google", None).await;
    assert_eq!(start.status(), StatusCode::SEE_OTHER);
    let authorize = url::Url::parse(&location(&start)).unwrap();
    let challenge = authorize
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned())
        .expect("challenge in authorize URL");
    let redirect_to = authorize
        .query_pairs()
        .find(|(k, _)| k == "redirect_to")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(redirect_to, "http://localhost:3000/auth/callback");
    let flow_cookie = set_cookie(&start, "folio_session_flow").expect("flow cookie set");

    let user = app.backend.add_account("ada@example.com", "hunter22");
    app.backend.grant_oauth_code("code-123", &challenge, user);

    let callback = app
        .get("/auth/callback?code=code-123", Some(&flow_cookie))
        .await;
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&callback), "/profile");
    assert!(set_cookie(&callback, COOKIE).is_some());
    assert_eq!(
        set_cookie(&callback, "folio_session_flow").as_deref(),
        Some("folio_session_flow=")
    );
    assert!(app.state.oauth_flows.lock().await.is_empty());
}

#[tokio::test]
async fn oauth_callback_without_flow_cookie_is_refused() {
    let app = TestApp::new();
    let user = app.backend.add_account("ada@example.com", "hunter22");
    app.backend
        .grant_oauth_code("code-123", &code_challenge("whatever"), user);

    let response = app.get("/auth/callback?code=code-123", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/auth/signin?error="));
}

#[tokio::test]
async fn oauth_callback_passes_provider_error_through() {
    let app = TestApp::new();
    let response = app
        .get("/auth/callback?error_description=Access+denied", None)
        .await;
    assert_eq!(location(&response), "/auth/signin?error=Access+denied");
}

#[tokio::test]
async fn unknown_oauth_provider_is_not_found() {
    let app = TestApp::new();
    let response = app.get("/auth/oauth/myspace", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
