use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

use crate::user::{UserRepository, authenticate};
use crate::web::ErrorResponse;

const BASIC_SCHEME: &str = "Basic";

/// The authenticated caller, inserted as a request extension by
/// `basic_auth_middleware` and recorded on the todo handlers' spans.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub name: String,
}

impl CurrentUser {
    /// Creates a new CurrentUser instance.
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

/// Authentication state: where the middleware looks users up.
#[derive(Clone)]
pub struct AuthState {
    pub users: Arc<dyn UserRepository>,
}

impl AuthState {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

/// Name and password carried by a Basic `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
pub struct Credentials {
    pub name: String,
    pub password: String,
}

/// Parses the value of an `Authorization` header using the Basic scheme.
///
/// Accepts the RFC 7617 form `Basic base64(name:password)` as well as the raw
/// `Basic name:password` form older clients send. The password may itself
/// contain colons; only the first one separates it from the name. The scheme
/// name is matched case-insensitively.
pub fn parse_basic_credentials(header: &str) -> Option<Credentials> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BASIC_SCHEME) {
        return None;
    }
    let token = token.trim();

    let decoded = STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    if let Some(credentials) = decoded.as_deref().and_then(split_credentials) {
        return Some(credentials);
    }

    // A raw pair always contains ':', which is never valid base64.
    split_credentials(token)
}

fn split_credentials(pair: &str) -> Option<Credentials> {
    let (name, password) = pair.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    Some(Credentials {
        name: name.to_string(),
        password: password.to_string(),
    })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("401 Unauthorized")),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
        .into_response()
}

/// Authentication middleware for the todo API.
///
/// Every request re-authenticates: the Basic credentials are checked against the
/// users table and, on success, a `CurrentUser` extension is inserted before the
/// request reaches the handler. Anything else is answered with 401 and the
/// handler never runs. Password verification runs on the blocking pool, and an
/// unknown name is checked against a dummy hash before it is rejected.
pub async fn basic_auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_credentials);
    let Some(credentials) = credentials else {
        tracing::debug!("Rejected request without usable Basic credentials");
        return unauthorized();
    };

    let Credentials { name, password } = credentials;
    let user = match state.users.find_user_by_name(&name).await {
        Ok(user) => user,
        Err(err) => {
            tracing::error!("Failed to look up user {}: {}", name, err);
            return internal_error();
        }
    };

    match authenticate(user, password).await {
        Ok(Some(user)) => {
            request
                .extensions_mut()
                .insert(CurrentUser::new(user.name().to_string()));
            next.run(request).await
        }
        Ok(None) => {
            tracing::info!("Rejected credentials for user {}", name);
            unauthorized()
        }
        Err(err) => {
            tracing::error!("Failed to verify password for user {}: {}", name, err);
            internal_error()
        }
    }
}
