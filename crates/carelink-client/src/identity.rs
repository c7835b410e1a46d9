//! Identity backend collaborators.
//!
//! The identity session supplies the bearer token for credential requests and
//! is refreshed when the token endpoint answers 401. [`GoTrueIdentity`] talks
//! to a GoTrue-compatible auth server; [`StaticIdentity`] serves a fixed
//! access token for headless use.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use carelink_core::SessionInfo;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::IdentityError;

/// Identity backend as seen by the session driver.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Current session, if signed in.
    async fn get_session(&self) -> Result<Option<SessionInfo>, IdentityError>;

    /// Exchange the refresh token for a new session.
    async fn refresh_session(&self) -> Result<SessionInfo, IdentityError>;

    /// End the session. The local session is cleared even if the backend
    /// call fails.
    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Fixed access token that cannot be refreshed.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    session: RwLock<Option<SessionInfo>>,
}

impl StaticIdentity {
    /// Identity with `access_token` and no expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        let session = SessionInfo {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        };
        Self { session: RwLock::new(Some(session)) }
    }

    /// Identity with no session at all; credential requests go out
    /// unauthenticated.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn get_session(&self) -> Result<Option<SessionInfo>, IdentityError> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self) -> Result<SessionInfo, IdentityError> {
        match &*self.session.read().await {
            Some(_) => Err(IdentityError::NoRefreshToken),
            None => Err(IdentityError::NoSession),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.session.write().await.take();
        Ok(())
    }
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct GrantResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct GoTrueError {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl GoTrueError {
    fn into_message(self) -> Option<String> {
        self.error_description.or(self.msg).or(self.message).or(self.error)
    }
}

/// Identity backed by a GoTrue-compatible auth server.
#[derive(Debug)]
pub struct GoTrueIdentity {
    client: Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<SessionInfo>>,
}

impl GoTrueIdentity {
    /// Identity for the auth server at `base_url` (e.g.
    /// `https://project.supabase.co/auth/v1`).
    pub fn new(base_url: &str, api_key: impl Into<String>, session: Option<SessionInfo>) -> Self {
        Self::with_client(Client::new(), base_url, api_key, session)
    }

    /// Identity sharing an existing HTTP client.
    pub fn with_client(
        client: Client,
        base_url: &str,
        api_key: impl Into<String>,
        session: Option<SessionInfo>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session: RwLock::new(session),
        }
    }

    async fn error_from(response: reqwest::Response) -> IdentityError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoTrueError>(&body)
            .ok()
            .and_then(GoTrueError::into_message)
            .unwrap_or_else(|| body.trim().to_string());
        IdentityError::Backend { status, message }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueIdentity {
    async fn get_session(&self) -> Result<Option<SessionInfo>, IdentityError> {
        Ok(self.session.read().await.clone())
    }

    #[tracing::instrument(skip_all, fields(base_url = %self.base_url))]
    async fn refresh_session(&self) -> Result<SessionInfo, IdentityError> {
        let refresh_token = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(IdentityError::NoSession)?;
            session.refresh_token.clone().ok_or(IdentityError::NoRefreshToken)?
        };

        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.api_key)
            .json(&RefreshBody { refresh_token: &refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::error_from(response).await;
            tracing::warn!(error = %err, "session refresh rejected");
            return Err(err);
        }

        let grant: GrantResponse = response.json().await?;
        let expires_at = grant.expires_at.or_else(|| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
            grant.expires_in.map(|secs| now.saturating_add(secs))
        });
        let session = SessionInfo {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
            expires_at,
        };

        *self.session.write().await = Some(session.clone());
        tracing::info!(?expires_at, "session refreshed");
        Ok(session)
    }

    #[tracing::instrument(skip_all, fields(base_url = %self.base_url))]
    async fn sign_out(&self) -> Result<(), IdentityError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        tracing::info!("signed out");
        Ok(())
    }
}
