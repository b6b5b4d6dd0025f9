//! GoTrue (Supabase auth) client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::infra::config::Config;
use crate::io::identity::{AuthSession, AuthUser, Identity, IdentityError, SignUp};

#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl GoTrueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.supabase_url().to_string(),
            api_key: config.supabase_anon_key().to_string(),
            timeout: Duration::from_millis(config.supabase_timeout_ms()),
        }
    }
}

pub struct GoTrueClient {
    config: GoTrueConfig,
    http: Client,
}

/// Sign-up answers with a full session when auto-confirm is on, a bare user otherwise
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(AuthSession),
    User(AuthUser),
}

impl GoTrueClient {
    pub fn new(config: GoTrueConfig) -> Result<Self, IdentityError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: Response) -> Result<Response, IdentityError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::BAD_REQUEST if body.contains("invalid_grant") || body.contains("Invalid login") => {
                IdentityError::InvalidCredentials
            }
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST
                if body.contains("already registered") || body.contains("user_already_exists") =>
            {
                IdentityError::AlreadyRegistered
            }
            _ => IdentityError::Status { status: status.as_u16(), body },
        })
    }
}

#[async_trait]
impl Identity for GoTrueClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUp, IdentityError> {
        let response = self
            .http
            .post(self.url("signup"))
            .header("apikey", &self.config.api_key)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let parsed: SignUpResponse = serde_json::from_str(&response.text().await?)?;
        let outcome = match parsed {
            SignUpResponse::Session(session) => SignUp { user: session.user.clone(), session: Some(session) },
            SignUpResponse::User(user) => SignUp { user, session: None },
        };
        info!(user_id = %outcome.user.id, confirmed = outcome.session.is_some(), "identity_sign_up");
        Ok(outcome)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        let response = self
            .http
            .post(self.url("token?grant_type=password"))
            .header("apikey", &self.config.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(serde_json::from_str(&response.text().await?)?)
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<AuthUser>, IdentityError> {
        let response = self
            .http
            .get(self.url("user"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(serde_json::from_str(&response.text().await?)?))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let response = self
            .http
            .post(self.url("logout"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        // An already-expired token is as good as signed out
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("identity_sign_out_token_expired");
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_response_variants() {
        let with_session = r#"{"access_token":"t","user":{"id":"u1","email":"a@b.co"}}"#;
        assert!(matches!(
            serde_json::from_str::<SignUpResponse>(with_session).unwrap(),
            SignUpResponse::Session(_)
        ));

        let bare_user = r#"{"id":"u1","email":"a@b.co","user_metadata":{"user_type":"customer"}}"#;
        match serde_json::from_str::<SignUpResponse>(bare_user).unwrap() {
            SignUpResponse::User(user) => assert_eq!(user.user_type(), Some("customer")),
            SignUpResponse::Session(_) => panic!("expected bare user"),
        }
    }

    #[test]
    fn test_url_joins_path() {
        let client = GoTrueClient::new(GoTrueConfig {
            base_url: "https://abc.supabase.co/".to_string(),
            api_key: "anon".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(client.url("logout"), "https://abc.supabase.co/auth/v1/logout");
    }
}
