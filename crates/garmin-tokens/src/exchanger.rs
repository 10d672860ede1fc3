//! Token exchanger seam
//!
//! The manager refreshes through this trait so tests can inject fakes and
//! never touch the network. `ConnectExchanger` is the production
//! implementation, delegating to the signed exchange in `garmin-auth`.

use async_trait::async_trait;

use garmin_auth::{API_USER_AGENT, ConsumerCredentials, OAuth1Credential, OAuth2Token};

use crate::error::{Error, Result};

/// Mint a fresh OAuth2 token from an OAuth1 credential.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, credential: &OAuth1Credential) -> garmin_auth::Result<OAuth2Token>;
}

/// Production exchanger against the Connect API exchange endpoint.
pub struct ConnectExchanger {
    http: reqwest::Client,
    consumer: ConsumerCredentials,
    base: Option<String>,
}

impl ConnectExchanger {
    /// Build an exchanger with its own HTTP client.
    pub fn new(consumer: ConsumerCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(API_USER_AGENT)
            .build()
            .map_err(|e| {
                Error::Auth(garmin_auth::Error::Http(format!(
                    "building exchange http client: {e}"
                )))
            })?;
        Ok(Self::with_http(http, consumer))
    }

    /// Build an exchanger sharing an existing HTTP client.
    pub fn with_http(http: reqwest::Client, consumer: ConsumerCredentials) -> Self {
        Self {
            http,
            consumer,
            base: None,
        }
    }

    /// Override the API base URL (tests, proxies). The default is derived
    /// from the credential's domain at exchange time.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }
}

#[async_trait]
impl TokenExchanger for ConnectExchanger {
    async fn exchange(&self, credential: &OAuth1Credential) -> garmin_auth::Result<OAuth2Token> {
        match &self.base {
            Some(base) => {
                garmin_auth::exchange_with_base(&self.http, &self.consumer, credential, base).await
            }
            None => garmin_auth::exchange(&self.http, &self.consumer, credential).await,
        }
    }
}
