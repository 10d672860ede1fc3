//! Token lifecycle management for the Garmin Connect client
//!
//! Owns the in-memory cache of the OAuth1 credential and OAuth2 token,
//! decides when a refresh is due, and coalesces concurrent refreshes into a
//! single exchange call. Durable persistence and the actual exchange are
//! behind the `TokenStorage` and `TokenExchanger` traits so the manager can
//! be tested with in-memory fakes.
//!
//! Token lifecycle:
//! 1. Login stores both tokens via `TokenManager::save_tokens`
//! 2. Each API call asks `get_valid_oauth2_token(true)` for a bearer token
//! 3. Inside the refresh window the manager re-exchanges the OAuth1
//!    credential, writes the new token through to storage, and returns it
//! 4. Once the OAuth1 credential itself dies (~1 year, surfaced as a 401
//!    on exchange) the only recovery is a fresh SSO login

pub mod error;
pub mod exchanger;
pub mod file;
pub mod manager;
pub mod storage;

pub use error::{Error, Result};
pub use exchanger::{ConnectExchanger, TokenExchanger};
pub use file::{FileCredentialStore, FileTokenStorage};
pub use manager::{AuthState, DEFAULT_REFRESH_BUFFER, TokenManager, TokenStatus};
pub use storage::{CredentialStore, MemoryTokenStorage, SavedCredentials, TokenStorage};
