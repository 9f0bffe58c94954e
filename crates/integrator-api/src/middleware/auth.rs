//! Basic authentication middleware for the `/api` subtree.
//!
//! Validates `Authorization: Basic` headers against the configured service
//! credentials. A simple credential check; per-user accounts live outside
//! this service.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::server::AppState;

/// Errors that can occur during authentication.
#[derive(Debug)]
pub enum AuthError {
    /// The Authorization header is missing or not basic auth.
    MissingHeader,
    /// The supplied credentials are wrong.
    InvalidCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::MissingHeader => "Missing Authorization header",
            Self::InvalidCredentials => "Unauthorized",
        };
        (StatusCode::UNAUTHORIZED, message).into_response()
    }
}

/// Extracts the username/password pair from a basic auth header.
fn extract_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (username, password) = pair.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Axum middleware enforcing basic authentication.
pub async fn basic_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let (username, password) =
        extract_credentials(req.headers()).ok_or(AuthError::MissingHeader)?;

    if username != state.credentials.username || password != state.credentials.password {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extracts_credentials_from_basic_header() {
        let mut headers = HeaderMap::new();
        // "admin:district" base64-encoded.
        headers.insert("authorization", HeaderValue::from_static("Basic YWRtaW46ZGlzdHJpY3Q="));

        let credentials = extract_credentials(&headers);
        assert_eq!(credentials, Some(("admin".to_string(), "district".to_string())));
    }

    #[test]
    fn rejects_missing_and_non_basic_headers() {
        let headers = HeaderMap::new();
        assert!(extract_credentials(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer token"));
        assert!(extract_credentials(&headers).is_none());
    }

    #[test]
    fn rejects_malformed_base64_payloads() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic !!!not-base64!!!"));
        assert!(extract_credentials(&headers).is_none());

        // Valid base64 but no colon separator.
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic YWRtaW4="));
        assert!(extract_credentials(&headers).is_none());
    }
}
