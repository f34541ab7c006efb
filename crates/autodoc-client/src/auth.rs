//! Authentication abstractions and the in-memory session token.

use std::fmt;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use parking_lot::RwLock;

use crate::error::{TransportError, TransportResult};

/// Authentication trait for signing outbound requests.
///
/// Used by the SSE transport on every connect and reconnect, so a dynamic
/// implementation (see [`TokenStore`]) always sends the freshest credential.
#[async_trait]
pub trait Authentication: Send + Sync + fmt::Debug {
    /// Add credentials to the outgoing headers.
    async fn authenticate(&self, headers: &mut HeaderMap) -> TransportResult<()>;
}

/// No authentication
#[derive(Debug, Clone, Default)]
pub struct NoAuth;

#[async_trait]
impl Authentication for NoAuth {
    async fn authenticate(&self, _headers: &mut HeaderMap) -> TransportResult<()> {
        Ok(())
    }
}

/// Fixed bearer token authentication
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    /// Create a new bearer token authentication.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl Authentication for BearerAuth {
    async fn authenticate(&self, headers: &mut HeaderMap) -> TransportResult<()> {
        headers.insert(AUTHORIZATION, bearer_header(&self.token)?);
        Ok(())
    }
}

/// Process-local holder of the current access token.
///
/// The token is never written anywhere but this struct. It is set by login,
/// signup and refresh, and cleared by logout. After a restart it is recovered
/// only through a cookie-based refresh.
#[derive(Default)]
pub struct TokenStore {
    token: RwLock<Option<String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, if any.
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.token.read().is_some()
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.is_set())
            .finish()
    }
}

#[async_trait]
impl Authentication for TokenStore {
    async fn authenticate(&self, headers: &mut HeaderMap) -> TransportResult<()> {
        if let Some(token) = self.get() {
            headers.insert(AUTHORIZATION, bearer_header(&token)?);
        }
        Ok(())
    }
}

/// Format `Authorization: Bearer <token>`, marked sensitive.
pub(crate) fn bearer_header(token: &str) -> TransportResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| TransportError::config(format!("Invalid bearer token: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_store_signs_only_when_set() {
        let store = TokenStore::new();
        let mut headers = HeaderMap::new();
        store.authenticate(&mut headers).await.expect("sign");
        assert!(headers.get(AUTHORIZATION).is_none());

        store.set("abc");
        store.authenticate(&mut headers).await.expect("sign");
        assert_eq!(
            headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );

        store.clear();
        assert!(!store.is_set());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let auth = BearerAuth::new("static-token");
        let mut headers = HeaderMap::new();
        auth.authenticate(&mut headers).await.expect("sign");
        let value = headers.get(AUTHORIZATION).expect("header");
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().ok(), Some("Bearer static-token"));
    }

    #[tokio::test]
    async fn test_invalid_token_is_config_error() {
        let auth = BearerAuth::new("bad\ntoken");
        let mut headers = HeaderMap::new();
        let err = auth.authenticate(&mut headers).await.expect_err("reject");
        assert!(matches!(err, TransportError::Config { .. }));
    }

    #[test]
    fn test_debug_redacts() {
        let store = TokenStore::new();
        store.set("secret");
        let rendered = format!("{store:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("has_token: true"));

        let rendered = format!("{:?}", BearerAuth::new("secret"));
        assert!(!rendered.contains("secret"));
    }
}
