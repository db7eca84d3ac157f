//! Caller credential extraction.
//!
//! The credential is opaque to crmpilot: it keys the caller's context
//! session and is forwarded verbatim to the record backend. It comes from
//! the `auth_token` cookie, falling back to an `Authorization: Bearer`
//! header.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;

use crate::ErrorResponse;

pub const AUTH_COOKIE: &str = "auth_token";

/// Credential from the request headers, cookie first.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, AUTH_COOKIE).or_else(|| bearer_token(headers))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Extractor that rejects the request with 401 when no credential is present.
#[derive(Debug, Clone)]
pub struct Credential(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Credential {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        credential_from_headers(&parts.headers)
            .map(Credential)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "Unauthorized".into(),
                    }),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn cookie_wins_over_bearer() {
        let h = headers(&[
            ("cookie", "theme=dark; auth_token=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(credential_from_headers(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn falls_back_to_bearer() {
        let h = headers(&[("cookie", "auth_token="), ("authorization", "Bearer abc123")]);
        assert_eq!(credential_from_headers(&h).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_or_malformed_is_none() {
        assert!(credential_from_headers(&HeaderMap::new()).is_none());
        assert!(credential_from_headers(&headers(&[("authorization", "Basic Zm9vOmJhcg==")])).is_none());
        assert!(credential_from_headers(&headers(&[("authorization", "Bearer   ")])).is_none());
    }
}
