//! Identity provider contract (sign-up, sign-in, session lookup, sign-out)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("user already registered")]
    AlreadyRegistered,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode identity response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

impl AuthUser {
    /// `user_type` recorded in the metadata at sign-up
    pub fn user_type(&self) -> Option<&str> {
        self.user_metadata.get("user_type").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Result of a sign-up. `session` is `None` while e-mail confirmation is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value)
        -> Result<SignUp, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError>;

    /// `Ok(None)` when the token is unknown or expired
    async fn get_session(&self, access_token: &str) -> Result<Option<AuthUser>, IdentityError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;
}
