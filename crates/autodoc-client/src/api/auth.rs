//! Session endpoints: login, signup, logout and the current user.

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    error::TransportResult,
    http::{ApiClient, RequestOptions},
};

/// A backend user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a successful login or signup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct Signup<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Session endpoints.
#[derive(Debug, Clone, Copy)]
pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AuthApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Log in and hold the returned access token.
    ///
    /// Sent without a bearer token, so a `401` here is a credential error and
    /// never triggers a refresh.
    pub async fn login(&self, email: &str, password: &str) -> TransportResult<AuthSession> {
        let options = RequestOptions::new()
            .skip_auth()
            .json(&Credentials { email, password })?;
        self.start_session("/auth/login", options).await
    }

    /// Create an account and hold the returned access token.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> TransportResult<AuthSession> {
        let options = RequestOptions::new().skip_auth().json(&Signup {
            name,
            email,
            password,
        })?;
        self.start_session("/auth/signup", options).await
    }

    /// End the session. The held token is cleared even when the call fails.
    pub async fn logout(&self) -> TransportResult<()> {
        let result = self
            .client
            .request(Method::POST, "/auth/logout", RequestOptions::new())
            .await;
        self.client.clear_access_token();
        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Logout failed, token cleared anyway");
                Err(e)
            }
        }
    }

    /// The user the held token belongs to.
    pub async fn me(&self) -> TransportResult<User> {
        self.client.get("/auth/me").await
    }

    async fn start_session(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> TransportResult<AuthSession> {
        let session: AuthSession = self
            .client
            .request(Method::POST, path, options)
            .await?
            .json()?;
        self.client.set_access_token(session.access_token.clone());
        info!(path, "Session started");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::decode_success;

    #[test]
    fn test_session_decodes_from_envelope() {
        let body = br#"{"success":true,"data":{"accessToken":"tok","user":{"id":"u1","email":"a@b.c","plan":"free"}}}"#;
        let session: AuthSession = decode_success(body).expect("decode");
        assert_eq!(session.access_token, "tok");
        let user = session.user.expect("user");
        assert_eq!(user.id, "u1");
        assert!(user.name.is_none());
        assert_eq!(user.extra.get("plan"), Some(&Value::from("free")));
    }

    #[test]
    fn test_session_without_user() {
        let session: AuthSession =
            decode_success(br#"{"data":{"accessToken":"tok"}}"#).expect("decode");
        assert!(session.user.is_none());
    }
}
