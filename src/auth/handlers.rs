use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::session;
use crate::backend::{AuthSession, Credentials, OAuthProvider, SignUpOutcome};
use crate::error::{AppError, AppResult};
use crate::extractors::get_cookie_value;
use crate::routes::home::Html;
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/signin.html")]
pub struct SignInTemplate {
    pub signed_in: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub google_enabled: bool,
}

#[derive(Template)]
#[template(path = "pages/signup.html")]
pub struct SignUpTemplate {
    pub signed_in: bool,
    pub error: Option<String>,
    pub google_enabled: bool,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CredentialsForm {
    pub email: String,
    pub password: String,
}

impl CredentialsForm {
    fn into_credentials(self) -> Option<Credentials> {
        let email = self.email.trim().to_string();
        if email.is_empty() || self.password.is_empty() {
            return None;
        }
        Some(Credentials {
            email,
            password: self.password,
        })
    }
}

#[derive(Deserialize, Default)]
pub struct AuthPageQuery {
    pub error: Option<String>,
    pub notice: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error_description: Option<String>,
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

/// The flow cookie must survive the cross-site redirect back from the
/// provider, hence `SameSite=Lax`.
fn flow_cookie_name(state: &AppState) -> String {
    format!("{}_flow", state.config.auth.cookie_name)
}

fn flow_cookie(name: &str, flow_id: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/auth; Max-Age=300",
        name, flow_id
    )
}

fn clear_flow_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/auth; Max-Age=0", name)
}

fn see_other(location: &str) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, location.to_string())], "").into_response()
}

/// Redirect to an auth page with a message in its query string.
fn redirect_with(path: &str, key: &str, message: &str) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, message)
        .finish();
    see_other(&format!("{}?{}", path, query))
}

/// Store the provider session locally, set the cookie and go to the profile.
fn start_session(
    state: &AppState,
    auth: &AuthSession,
    extra_cookie: Option<String>,
) -> AppResult<Response> {
    let token = session::create_session(&state.db, auth, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    let mut response = (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/profile".to_string())],
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        "",
    )
        .into_response();
    if let Some(extra) = extra_cookie {
        let value = extra
            .parse()
            .map_err(|_| AppError::Internal("Invalid cookie header".into()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

// -- Password sign-in --

/// GET /auth/signin — render sign-in form
pub async fn signin_page(
    State(state): State<AppState>,
    Query(query): Query<AuthPageQuery>,
) -> Html<SignInTemplate> {
    Html(SignInTemplate {
        signed_in: false,
        error: query.error,
        notice: query.notice,
        google_enabled: state.config.oauth_enabled(OAuthProvider::Google.as_str()),
    })
}

/// POST /auth/signin — forward credentials to the provider
pub async fn signin(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Response> {
    let Some(credentials) = form.into_credentials() else {
        return Ok(redirect_with(
            "/auth/signin",
            "error",
            "Email and password are required",
        ));
    };

    match state.backend.sign_in_with_password(&credentials).await {
        Ok(auth) => start_session(&state, &auth, None),
        Err(e) => {
            tracing::warn!("Sign-in rejected: {}", e);
            Ok(redirect_with("/auth/signin", "error", &e.user_message()))
        }
    }
}

// -- Sign-up --

/// GET /auth/signup — render sign-up form
pub async fn signup_page(
    State(state): State<AppState>,
    Query(query): Query<AuthPageQuery>,
) -> Html<SignUpTemplate> {
    Html(SignUpTemplate {
        signed_in: false,
        error: query.error,
        google_enabled: state.config.oauth_enabled(OAuthProvider::Google.as_str()),
    })
}

/// POST /auth/signup — create the account with the provider
pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Response> {
    let Some(credentials) = form.into_credentials() else {
        return Ok(redirect_with(
            "/auth/signup",
            "error",
            "Email and password are required",
        ));
    };

    match state.backend.sign_up(&credentials).await {
        Ok(SignUpOutcome::Session(auth)) => start_session(&state, &auth, None),
        Ok(SignUpOutcome::ConfirmationSent(user)) => {
            tracing::info!(user_id = %user.id, "Sign-up awaiting email confirmation");
            Ok(redirect_with(
                "/auth/signin",
                "notice",
                "Check your email to confirm your account",
            ))
        }
        Err(e) => {
            tracing::warn!("Sign-up rejected: {}", e);
            Ok(redirect_with("/auth/signup", "error", &e.user_message()))
        }
    }
}

// -- Sign-out --

/// POST /auth/signout — drop the session and redirect, with or without one
pub async fn signout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;

    if let Some(token) = get_cookie_value(&headers, cookie_name) {
        match session::delete_session(&state.db, token) {
            Ok(Some(access_token)) => {
                if let Err(e) = state.backend.sign_out(&access_token).await {
                    tracing::warn!("Provider sign-out failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to delete session: {}", e),
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/auth/signin".to_string()),
            (header::SET_COOKIE, clear_cookie(cookie_name)),
        ],
        "",
    )
        .into_response())
}

// -- OAuth --

/// GET /auth/oauth/{provider} — begin a PKCE sign-in with the provider
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Response> {
    if !state.config.oauth_enabled(&provider) {
        return Err(AppError::NotFound);
    }
    let provider: OAuthProvider = provider.parse().map_err(|_| AppError::NotFound)?;

    let (flow_id, flow) = {
        let mut flows = state.oauth_flows.lock().await;
        flows.begin(provider)
    };

    let challenge = crate::auth::oauth::code_challenge(&flow.verifier);
    let authorize = state.backend.authorize_url(
        provider,
        &state.config.oauth_callback_url(),
        &challenge,
    )?;

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, authorize.to_string()),
            (
                header::SET_COOKIE,
                flow_cookie(&flow_cookie_name(&state), &flow_id),
            ),
        ],
        "",
    )
        .into_response())
}

/// GET /auth/callback — finish the OAuth sign-in
pub async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let cookie_name = flow_cookie_name(&state);

    let pending = match get_cookie_value(&headers, &cookie_name) {
        Some(flow_id) => state.oauth_flows.lock().await.take(flow_id),
        None => None,
    };

    if let Some(message) = query.error_description {
        tracing::warn!("OAuth provider returned an error: {}", message);
        return Ok(redirect_with("/auth/signin", "error", &message));
    }

    let (Some(flow), Some(code)) = (pending, query.code) else {
        return Ok(redirect_with(
            "/auth/signin",
            "error",
            "Sign-in expired, please try again",
        ));
    };

    match state.backend.exchange_code(&code, &flow.verifier).await {
        Ok(auth) => {
            tracing::info!(provider = flow.provider.as_str(), "OAuth sign-in completed");
            start_session(&state, &auth, Some(clear_flow_cookie(&cookie_name)))
        }
        Err(e) => {
            tracing::warn!("OAuth code exchange failed: {}", e);
            Ok(redirect_with("/auth/signin", "error", &e.user_message()))
        }
    }
}
