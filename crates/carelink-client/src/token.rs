//! Media credential service.
//!
//! [`HttpTokenService`] posts the participant's [`TokenRequest`] to the token
//! endpoint and returns the signed credential. The endpoint may answer with
//! `{"token": "..."}`, a bare JSON string, or the raw token as text.

use async_trait::async_trait;
use carelink_core::{TokenError, TokenRequest};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Source of signed media credentials.
#[async_trait]
pub trait TokenService: Send + Sync + 'static {
    /// Request a credential for `request`, authenticated with the identity
    /// session's access token when one is available.
    async fn fetch_token(
        &self,
        request: &TokenRequest,
        bearer: Option<&str>,
    ) -> Result<String, TokenError>;
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

/// Token service backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenService {
    client: Client,
    endpoint: String,
}

impl HttpTokenService {
    /// Token service for `{base_url}/api/token`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Token service sharing an existing HTTP client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        let endpoint = format!("{}/api/token", base_url.trim_end_matches('/'));
        Self { client, endpoint }
    }

    /// Full URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    #[tracing::instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn fetch_token(
        &self,
        request: &TokenRequest,
        bearer: Option<&str>,
    ) -> Result<String, TokenError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| TokenError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| TokenError::Transport(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("token endpoint returned 401");
            return Err(TokenError::Unauthorized);
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| body.trim().to_string());
            tracing::warn!(status = status.as_u16(), %message, "token request failed");
            return Err(TokenError::Status { status: status.as_u16(), message });
        }

        let token = parse_token_body(&body)?;
        tracing::debug!(len = token.len(), "token received");
        Ok(token)
    }
}

fn parse_token_body(body: &str) -> Result<String, TokenError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(TokenError::InvalidResponse("empty body".into()));
    }

    if trimmed.starts_with('{') {
        return serde_json::from_str::<TokenBody>(trimmed)
            .map(|b| b.token)
            .map_err(|e| TokenError::InvalidResponse(e.to_string()));
    }
    if trimmed.starts_with('"') {
        return serde_json::from_str::<String>(trimmed)
            .map_err(|e| TokenError::InvalidResponse(e.to_string()));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_body_shapes() {
        assert_eq!(parse_token_body(r#"{"token":"a.b.c"}"#).unwrap(), "a.b.c");
        assert_eq!(parse_token_body(r#""a.b.c""#).unwrap(), "a.b.c");
        assert_eq!(parse_token_body("a.b.c\n").unwrap(), "a.b.c");
    }

    #[test]
    fn rejects_empty_and_tokenless_bodies() {
        assert!(matches!(parse_token_body("  "), Err(TokenError::InvalidResponse(_))));
        assert!(matches!(parse_token_body(r#"{"jwt":"x"}"#), Err(TokenError::InvalidResponse(_))));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let service = HttpTokenService::new("http://localhost:3000/");
        assert_eq!(service.endpoint(), "http://localhost:3000/api/token");
    }
}
