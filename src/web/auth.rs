use std::collections::HashMap;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use chrono::Utc;
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{info, warn};

use crate::{
    config::{CookieSettings, Credentials},
    web::{
        AppState,
        templates::{LoginNotice, render_login_page},
    },
};

/// Tri-state login result tracked per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    Failed,
    NotAttempted,
}

impl AuthStatus {
    pub fn as_flag(self) -> Option<bool> {
        match self {
            AuthStatus::Authenticated => Some(true),
            AuthStatus::Failed => Some(false),
            AuthStatus::NotAttempted => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
    pub name: String,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.username
        } else {
            &self.name
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionState {
    pub status: AuthStatus,
    pub user: Option<AuthUser>,
}

impl SessionState {
    pub fn not_attempted() -> Self {
        Self {
            status: AuthStatus::NotAttempted,
            user: None,
        }
    }

    fn failed() -> Self {
        Self {
            status: AuthStatus::Failed,
            user: None,
        }
    }

    fn authenticated(user: AuthUser) -> Self {
        Self {
            status: AuthStatus::Authenticated,
            user: Some(user),
        }
    }
}

/// Signed cookie payload.
#[derive(Serialize, Deserialize)]
struct SessionClaims {
    username: String,
    name: String,
    exp: i64,
}

struct Account {
    username: String,
    name: String,
    password_hash: String,
    is_admin: bool,
}

impl Account {
    fn to_user(&self) -> AuthUser {
        AuthUser {
            username: self.username.clone(),
            name: self.name.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// Validates logins against provisioned credentials and issues the signed
/// session cookie.
pub struct Authenticator {
    accounts: HashMap<String, Account>,
    cookie_name: String,
    expiry_secs: i64,
}

impl Authenticator {
    pub fn new(credentials: &Credentials, cookie: &CookieSettings) -> Self {
        let accounts = credentials
            .usernames
            .iter()
            .map(|(username, record)| {
                (
                    username.trim().to_lowercase(),
                    Account {
                        username: username.trim().to_string(),
                        name: record.name.trim().to_string(),
                        password_hash: record.password.trim().to_string(),
                        is_admin: record.is_admin(),
                    },
                )
            })
            .collect();

        Self {
            accounts,
            cookie_name: cookie.name.clone(),
            expiry_secs: (cookie.expiry_days * 86_400.0).round() as i64,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn login(&self, username: &str, password: &str) -> SessionState {
        let Some(account) = self.accounts.get(&username.trim().to_lowercase()) else {
            return SessionState::failed();
        };

        if !verify_password(password, &account.password_hash) {
            return SessionState::failed();
        }

        SessionState::authenticated(account.to_user())
    }

    /// Resolves the session carried by the request's signed cookie.
    pub fn session(&self, jar: &SignedCookieJar) -> SessionState {
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return SessionState::not_attempted();
        };

        let Ok(claims) = serde_json::from_str::<SessionClaims>(cookie.value()) else {
            return SessionState::not_attempted();
        };

        if claims.exp <= Utc::now().timestamp() {
            return SessionState::not_attempted();
        }

        match self.accounts.get(&claims.username.to_lowercase()) {
            Some(account) => SessionState::authenticated(account.to_user()),
            None => SessionState::not_attempted(),
        }
    }

    pub fn session_cookie(&self, user: &AuthUser) -> Cookie<'static> {
        let claims = SessionClaims {
            username: user.username.clone(),
            name: user.name.clone(),
            exp: Utc::now().timestamp().saturating_add(self.expiry_secs),
        };
        let value = serde_json::to_string(&claims).unwrap_or_default();

        let mut cookie = Cookie::new(self.cookie_name.clone(), value);
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(CookieDuration::seconds(self.expiry_secs));
        cookie
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut removal = Cookie::new(self.cookie_name.clone(), "");
        removal.set_path("/");
        removal.set_http_only(true);
        removal.set_same_site(SameSite::Lax);
        removal.set_max_age(CookieDuration::seconds(0));
        removal
    }
}

/// Stretches the configured signing key to the 64 bytes HMAC signing needs.
pub fn derive_cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login_page(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    if portal.auth.session(&jar).status == AuthStatus::Authenticated {
        return Redirect::to("/").into_response();
    }

    Html(render_login_page(LoginNotice::Prompt)).into_response()
}

pub async fn process_login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    let session = portal.auth.login(&form.username, &form.password);
    match (session.status, session.user) {
        (AuthStatus::Authenticated, Some(user)) => {
            info!(username = %user.username, "login succeeded");
            let jar = jar.add(portal.auth.session_cookie(&user));
            (jar, Redirect::to("/")).into_response()
        }
        _ => {
            warn!(username = %form.username.trim(), "login failed");
            (
                StatusCode::UNAUTHORIZED,
                Html(render_login_page(LoginNotice::Failed)),
            )
                .into_response()
        }
    }
}

/// Drops the cookie from the browser only; sessions live in the signed cookie,
/// so a copied cookie stays valid until its own expiry.
pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    if let Some(user) = portal.auth.session(&jar).user {
        info!(username = %user.username, "logged out");
    }

    let jar = jar.remove(portal.auth.removal_cookie());
    (jar, Redirect::to("/?status=logged_out")).into_response()
}

/// Gate shared by every protected page: the authenticated user, or the
/// login-required page that halts the request.
pub fn require_user(state: &AppState, jar: &SignedCookieJar) -> Result<AuthUser, Response> {
    let portal = state.portal()?;
    match portal.auth.session(jar).user {
        Some(user) => Ok(user),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Html(render_login_page(LoginNotice::LoginRequired)),
        )
            .into_response()),
    }
}

pub fn require_admin(state: &AppState, jar: &SignedCookieJar) -> Result<AuthUser, Response> {
    let portal = state.portal()?;
    let Some(user) = portal.auth.session(jar).user else {
        return Err(Redirect::to("/login").into_response());
    };

    if !user.is_admin {
        return Err(Redirect::to("/?error=not_authorized").into_response());
    }

    Ok(user)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}
