//! Authentication middleware for Axum
//!
//! Extracts bearer tokens (or an API-key header) from requests and maps
//! them to user ids through the `AuthStore`. Streaming endpoints may
//! carry the token as a `?token=` query parameter since EventSource
//! clients cannot set headers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::server::config::AuthConfig;

/// Resolved caller identity.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

/// Token-to-user mapping loaded from configuration.
pub struct AuthStore {
    enabled: bool,
    tokens: HashMap<String, String>,
}

impl AuthStore {
    /// Build the store from configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            enabled: config.enabled,
            tokens: config
                .tokens
                .iter()
                .map(|t| (t.token.clone(), t.user_id.clone()))
                .collect(),
        }
    }

    /// Whether authentication is enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Resolve a presented token to a user id.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<AuthContext> {
        self.tokens.get(token).map(|user_id| AuthContext {
            user_id: user_id.clone(),
        })
    }
}

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

/// Auth rejection type
#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    error: String,
    code: &'static str,
}

impl AuthRejection {
    fn unauthorized(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: error.into(),
            code,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(AuthErrorResponse {
                success: false,
                error: self.error,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Axum extractor that requires an authenticated caller.
///
/// Token sources, in order:
/// 1. `Authorization: Bearer <token>` header
/// 2. `X-API-Key: <key>` header
/// 3. `?token=<token>` query parameter (streaming handshakes)
pub struct RequireAuth(pub AuthContext);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let store = parts
            .extensions
            .get::<Arc<AuthStore>>()
            .ok_or_else(|| AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "auth store not configured".to_string(),
                code: "INTERNAL_ERROR",
            })?;

        if !store.is_enabled() {
            return Ok(RequireAuth(AuthContext {
                user_id: "anonymous".to_string(),
            }));
        }

        let token = extract_token(parts).ok_or_else(|| {
            AuthRejection::unauthorized(
                "Authentication required. Provide Authorization: Bearer <token>.",
                "UNAUTHORIZED",
            )
        })?;

        store
            .authenticate(&token)
            .map(RequireAuth)
            .ok_or_else(|| AuthRejection::unauthorized("Invalid token", "INVALID_CREDENTIALS"))
    }
}

fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(value) = parts.headers.get("x-api-key") {
        if let Ok(value) = value.to_str() {
            return Some(value.trim().to_string());
        }
    }

    parts.uri.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("token=")
                .map(|token| token.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::AuthTokenEntry;
    use axum::http::Request;

    fn store() -> Arc<AuthStore> {
        Arc::new(AuthStore::from_config(&AuthConfig {
            enabled: true,
            tokens: vec![AuthTokenEntry {
                token: "secret-token".to_string(),
                user_id: "user-1".to_string(),
            }],
        }))
    }

    fn parts_for(uri: &str, header: Option<(&str, &str)>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        parts.extensions.insert(store());
        parts
    }

    #[tokio::test]
    async fn test_bearer_header_accepted() {
        let mut parts = parts_for("/x", Some(("authorization", "Bearer secret-token")));
        let RequireAuth(ctx) = RequireAuth::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(ctx.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_api_key_header_accepted() {
        let mut parts = parts_for("/x", Some(("x-api-key", "secret-token")));
        assert!(RequireAuth::from_request_parts(&mut parts, &()).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_token_accepted() {
        let mut parts = parts_for("/x?token=secret-token", None);
        assert!(RequireAuth::from_request_parts(&mut parts, &()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_tokens_rejected() {
        let mut parts = parts_for("/x", None);
        assert!(RequireAuth::from_request_parts(&mut parts, &()).await.is_err());

        let mut parts = parts_for("/x", Some(("authorization", "Bearer wrong")));
        assert!(RequireAuth::from_request_parts(&mut parts, &()).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_auth_yields_anonymous() {
        let mut parts = Request::builder()
            .uri("/x")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        parts.extensions.insert(Arc::new(AuthStore::from_config(&AuthConfig {
            enabled: false,
            tokens: vec![],
        })));

        let RequireAuth(ctx) = RequireAuth::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(ctx.user_id, "anonymous");
    }
}
