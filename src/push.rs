use async_trait::async_trait;
use oauth2::{basic::BasicTokenResponse, AccessToken, TokenResponse};
use reqwest::{Client, StatusCode};

use crate::Error;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Identifier the completion receiver expects for an object: the part of
/// `name` before the first `_`, then `_<task>`.
pub fn callback_id(name: &str, task: &str) -> String {
    let prefix = name.split('_').next().unwrap_or_default();
    format!("{prefix}_{task}")
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, id: &str) -> Result<(), Error>;
}

pub struct MetadataTokenSource {
    http: Client,
}

impl MetadataTokenSource {
    pub const fn new(http: Client) -> Self {
        Self { http }
    }

    async fn token(&self) -> Result<AccessToken, Error> {
        let response: BasicTokenResponse = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.access_token().clone())
    }
}

/// Posts an empty body to `<base>/<id>` and expects `200 OK`.
pub struct HttpNotifier {
    http: Client,
    base: String,
    token_source: Option<MetadataTokenSource>,
}

impl HttpNotifier {
    pub fn new(http: Client, base: String, token_source: Option<MetadataTokenSource>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_owned(),
            token_source,
        }
    }

    fn url(&self, id: &str) -> String {
        format!("{}/{id}", self.base)
    }
}

#[async_trait]
impl CompletionNotifier for HttpNotifier {
    #[instrument(skip(self))]
    async fn notify(&self, id: &str) -> Result<(), Error> {
        let mut request = self.http.post(self.url(id)).body(Vec::<u8>::new());
        if let Some(source) = &self.token_source {
            request = request.bearer_auth(source.token().await?.secret());
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(Error::PushStatus(response.status()));
        }
        Ok(())
    }
}
