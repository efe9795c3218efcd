//! Credentials attached to BigQuery requests.

use std::fmt;
use std::sync::Arc;

use google_cloud_auth::project::Config;
use google_cloud_auth::token::DefaultTokenSourceProvider;
use google_cloud_token::{TokenSource, TokenSourceProvider};
use tracing::info;

use crate::{Error, Result};

const SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/bigquery"];

#[derive(Clone)]
pub enum Credentials {
    /// No `Authorization` header, for emulators and local endpoints.
    Anonymous,
    /// A fixed bearer token. It is never refreshed.
    AccessToken(String),
    /// Token source that caches the current token and refreshes it before it expires. Yields the
    /// complete header value (`Bearer <token>`).
    TokenSource(Arc<dyn TokenSource>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::AccessToken(_) => write!(f, "AccessToken(****)"),
            Credentials::TokenSource(_) => write!(f, "TokenSource"),
        }
    }
}

impl Credentials {
    /// Looks up the application default credentials the same way the Pub/Sub client does
    /// (`GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user credentials, then the metadata server).
    pub async fn application_default() -> Result<Self> {
        let provider = DefaultTokenSourceProvider::new(Config::default().with_scopes(&SCOPES))
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        info!("Using application default credentials for BigQuery");
        Self::from_token_source(provider.token_source()).await
    }

    /// Wraps `source` after fetching a first token, so unusable credentials fail here rather than
    /// on the first insert.
    pub async fn from_token_source(source: Arc<dyn TokenSource>) -> Result<Self> {
        source
            .token()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        Ok(Credentials::TokenSource(source))
    }

    /// Value of the `Authorization` header for the next request.
    pub(crate) async fn authorization(&self) -> Result<Option<String>> {
        match self {
            Credentials::Anonymous => Ok(None),
            Credentials::AccessToken(token) => Ok(Some(format!("Bearer {token}"))),
            Credentials::TokenSource(source) => source
                .token()
                .await
                .map(Some)
                .map_err(|e| Error::Auth(e.to_string())),
        }
    }
}
