//! Authenticated Garmin Connect API client
//!
//! Thin request wrapper over the token manager: every call first obtains a
//! currently valid OAuth2 token (auto-refreshing through the manager when
//! needed), attaches the bearer authorization and the fixed client
//! identifier, and maps non-2xx responses to errors carrying status and
//! body. A 401 is surfaced as-is: it means the server rejected the token
//! (typically the OAuth1 credential finally expired), not that the token
//! aged out by the clock, so re-exchanging would not help and the caller
//! decides whether to prompt for a fresh login.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use tracing::{debug, warn};

use garmin_auth::API_USER_AGENT;
use garmin_tokens::TokenManager;

/// Errors from authenticated API requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Token(#[from] garmin_tokens::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result alias for API client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Authenticated request client for one Connect domain.
pub struct ApiClient {
    http: reqwest::Client,
    manager: Arc<TokenManager>,
    domain: String,
    base: Option<String>,
}

impl ApiClient {
    /// Build a client against `domain` (`garmin.com` or `garmin.cn`).
    pub fn new(manager: Arc<TokenManager>, domain: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(API_USER_AGENT)
            .build()
            .map_err(|e| Error::Http(format!("building api http client: {e}")))?;
        Ok(Self {
            http,
            manager,
            domain: domain.into(),
            base: None,
        })
    }

    /// Override the base URL, ignoring subdomain/domain (tests, proxies).
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Issue an authenticated request.
    ///
    /// The URL is `https://<subdomain>.<domain><path>`. A valid OAuth2
    /// token is obtained from the manager first (auto-refresh enabled), so
    /// callers never see clock-expired tokens; any remaining 401 is a
    /// server-side rejection and is returned as `Error::Status`.
    pub async fn request(
        &self,
        method: Method,
        subdomain: &str,
        path: &str,
        body: Option<serde_json::Value>,
        headers: Option<HeaderMap>,
    ) -> Result<reqwest::Response> {
        let token = self.manager.get_valid_oauth2_token(true).await?;
        let url = self.build_url(subdomain, path);
        debug!(%method, %url, "api request");

        let mut request = self.http.request(method, &url).header(
            AUTHORIZATION,
            format!("{} {}", token.token_type, token.access_token),
        );
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("api request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            if status.as_u16() == 401 {
                warn!(%url, "request rejected with 401; the OAuth1 credential may have expired server-side");
            }
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Authenticated GET returning the response body as text.
    pub async fn get(&self, subdomain: &str, path: &str) -> Result<String> {
        let response = self.request(Method::GET, subdomain, path, None, None).await?;
        response
            .text()
            .await
            .map_err(|e| Error::InvalidResponse(format!("reading response body: {e}")))
    }

    /// Authenticated GET decoding the response body as JSON.
    pub async fn get_json(&self, subdomain: &str, path: &str) -> Result<serde_json::Value> {
        let response = self.request(Method::GET, subdomain, path, None, None).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("decoding response body: {e}")))
    }

    fn build_url(&self, subdomain: &str, path: &str) -> String {
        match &self.base {
            Some(base) => format!("{base}{path}"),
            None => format!("https://{subdomain}.{}{path}", self.domain),
        }
    }
}
