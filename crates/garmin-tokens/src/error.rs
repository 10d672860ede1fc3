//! Error types for token lifecycle operations

/// Errors from token manager and storage operations.
///
/// `Clone` so one refresh outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No OAuth1 credential is cached or stored; only a new SSO login fixes
    /// this.
    #[error("no OAuth1 token")]
    NoOAuth1Token,

    #[error("no OAuth2 token")]
    NoOAuth2Token,

    #[error("OAuth2 token expired and auto-refresh is disabled")]
    OAuth2Expired,

    #[error("token exchanger not configured")]
    ExchangerNotConfigured,

    #[error("token storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Auth(#[from] garmin_auth::Error),

    #[error("refresh task failed: {0}")]
    RefreshTask(String),
}

/// Result alias for token lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
