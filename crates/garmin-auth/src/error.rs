//! Error types for authentication operations

/// Errors from SSO login, request signing, and token exchange.
///
/// Variants carry plain strings so a single refresh outcome can be cloned
/// to every waiter of a coalesced refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("CSRF token not found")]
    CsrfNotFound,

    #[error("page title not found")]
    TitleNotFound,

    #[error("login ticket not found in response")]
    TicketNotFound,

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("MFA code required but no MFA handler was provided")]
    MfaRequired,

    #[error("MFA handler failed: {0}")]
    Mfa(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result alias for authentication operations.
pub type Result<T> = std::result::Result<T, Error>;
