use async_trait::async_trait;
use oauth2::AccessToken;
use reqwest::Client;

use crate::{AppState, Error};

#[derive(serde::Deserialize, Debug, Clone, Default)]
pub struct TokenInfo {
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &AccessToken) -> Result<TokenInfo, Error>;
}

/// Google's OAuth2 tokeninfo endpoint.
pub struct GoogleTokenInfo {
    http: Client,
    url: String,
}

impl GoogleTokenInfo {
    pub const fn new(http: Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl TokenVerifier for GoogleTokenInfo {
    async fn verify(&self, token: &AccessToken) -> Result<TokenInfo, Error> {
        let info = self
            .http
            .get(&self.url)
            .query(&[("access_token", token.secret())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<AccessToken> {
    let mut fields = header.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some("Bearer"), Some(token), None) => Some(AccessToken::new(token.to_owned())),
        _ => None,
    }
}

/// Whether `header` carries a token for the configured project's service identity.
///
/// Malformed headers are `Ok(false)` without contacting the verifier; errors
/// are reserved for verification failures.
#[instrument(skip_all)]
pub async fn authorized(state: &AppState, header: &str) -> Result<bool, Error> {
    let Some(token) = bearer_token(header) else {
        return Ok(false);
    };
    let info = state.verifier.verify(&token).await?;
    let Some(email) = info.email else {
        debug!("Token has no email");
        return Ok(false);
    };
    let local = email.split('@').next().unwrap_or_default();
    if local != state.config.project_id {
        debug!(%email, "Token belongs to another identity");
        return Ok(false);
    }
    Ok(true)
}
