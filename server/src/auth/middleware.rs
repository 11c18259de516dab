//! Authentication middleware.
//!
//! When `AUTH_SECRET` is configured every sync request must carry it, either
//! as a Bearer token or, for WebSocket upgrades from browsers, as a `token`
//! query parameter. Without a secret, requests are accepted anonymously.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// True when the server runs without a secret
    pub anonymous: bool,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser { anonymous: true });
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) => header
                .strip_prefix("Bearer ")
                .ok_or_else(|| reject("invalid authorization header format"))?,
            None => query_token(parts).ok_or_else(|| reject("missing authorization header"))?,
        };

        if token.is_empty() {
            return Err(reject("empty bearer token"));
        }
        if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            return Err(reject("invalid token"));
        }

        Ok(AuthUser { anonymous: false })
    }
}

fn reject(reason: &'static str) -> AppError {
    tracing::debug!(reason, "rejected sync request");
    AppError::Unauthorized
}

fn query_token(parts: &Parts) -> Option<&str> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    fn parts(uri: &str, header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(header) = header {
            builder = builder.header(AUTHORIZATION, header);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn extract(
        secret: Option<&str>,
        uri: &str,
        header: Option<&str>,
    ) -> Result<AuthUser, StatusCode> {
        let state = test_state(secret);
        AuthUser::from_request_parts(&mut parts(uri, header), &state)
            .await
            .map_err(|err| err.status())
    }

    #[tokio::test]
    async fn anonymous_without_secret() {
        let user = extract(None, "/sync/g1/node", None).await.unwrap();
        assert!(user.anonymous);
    }

    #[tokio::test]
    async fn secret_is_required() {
        assert_eq!(
            extract(Some("s3cret"), "/sync/g1/node", None).await,
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            extract(Some("s3cret"), "/sync/g1/node", Some("Bearer nope")).await,
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            extract(Some("s3cret"), "/sync/g1/node", Some("Basic s3cret")).await,
            Err(StatusCode::UNAUTHORIZED)
        );

        let user = extract(Some("s3cret"), "/sync/g1/node", Some("Bearer s3cret"))
            .await
            .unwrap();
        assert!(!user.anonymous);
    }

    #[tokio::test]
    async fn query_token_for_websockets() {
        let uri = "/sync/g1/ws?nodeId=00000000000000aa&token=s3cret";
        let user = extract(Some("s3cret"), uri, None).await.unwrap();
        assert!(!user.anonymous);
    }

    #[tokio::test]
    async fn rejection_is_unauthorized_error() {
        let state = test_state(Some("s3cret"));
        let err = AuthUser::from_request_parts(&mut parts("/sync/g1/node", None), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
