//! Garmin Connect authentication library
//!
//! Implements the two-tier OAuth scheme used by the Garmin Connect API:
//! a long-lived OAuth1 credential obtained through the browser-style SSO
//! flow, and a short-lived OAuth2 bearer token minted by exchanging that
//! credential. This crate is a standalone library with no dependency on
//! the CLI binary — it can be tested and used independently.
//!
//! Credential flow:
//! 1. Caller runs `SsoClient::login()` with email/password (and an
//!    `MfaCodeSource` when the account has MFA enabled)
//! 2. The flow extracts a one-time ticket from the SSO success page
//! 3. The ticket is traded for an OAuth1 credential via the signed
//!    pre-authorization endpoint
//! 4. `exchange()` trades the OAuth1 credential for an OAuth2 token
//! 5. The caller persists both tokens; later refreshes repeat step 4 only

pub mod constants;
pub mod error;
pub mod exchange;
pub mod models;
pub mod oauth1;
pub mod sso;

pub use constants::*;
pub use error::{Error, Result};
pub use exchange::{exchange, exchange_with_base, fetch_consumer};
pub use models::{ConsumerCredentials, OAuth1Credential, OAuth2Token, TokenResponse, now_epoch};
pub use oauth1::Signer;
pub use sso::{MfaCodeSource, SsoClient};
