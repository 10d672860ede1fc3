//! Token data model
//!
//! `OAuth1Credential` is the long-lived (~1 year) signing credential issued
//! by the SSO flow. `OAuth2Token` is the short-lived (~1 hour) bearer token
//! minted from it. Expiry instants are absolute unix seconds, computed once
//! when a token is minted from the wire response and never recomputed from
//! the relative `expires_in` fields again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current unix time in seconds.
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Long-lived OAuth1 signing credential.
///
/// Issued by the SSO flow and used only to mint OAuth2 tokens. Immutable
/// once issued; server-side expiry (~1 year) is detected only via a 401 on
/// exchange. The `mfa_token` pair is present only when MFA participated in
/// the login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth1Credential {
    pub token: String,
    pub token_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
    /// MFA token expiry as issued by the server (unix milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_expiration_timestamp: Option<u64>,
    /// Domain family the credential was issued against (`garmin.com` or
    /// `garmin.cn`)
    pub domain: String,
}

/// Short-lived OAuth2 bearer token.
///
/// `expires_at` / `refresh_token_expires_at` are unix seconds computed at
/// mint time from the corresponding `expires_in` deltas. The refresh-token
/// fields are stored but never used to refresh — refresh always re-derives
/// from the OAuth1 credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub scope: String,
    pub jti: String,
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub expires_at: u64,
    pub refresh_token_expires_in: u64,
    pub refresh_token_expires_at: u64,
}

impl OAuth2Token {
    /// Whether the access token is expired at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the access token is expired at the current time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch())
    }

    /// Whether the (unused) refresh token is expired at `now`.
    pub fn is_refresh_expired_at(&self, now: u64) -> bool {
        now >= self.refresh_token_expires_at
    }

    /// Whether the (unused) refresh token is expired at the current time.
    pub fn is_refresh_expired(&self) -> bool {
        self.is_refresh_expired_at(now_epoch())
    }

    /// Whether the token is inside the proactive-refresh window at `now`:
    /// refresh is due once `now >= expires_at - buffer`.
    pub fn needs_refresh_at(&self, now: u64, buffer: Duration) -> bool {
        now >= self.expires_at.saturating_sub(buffer.as_secs())
    }
}

/// Wire shape of the exchange endpoint response.
///
/// The `expires_in` fields are deltas in seconds from the response time.
/// `into_token` converts them to absolute instants against a caller-supplied
/// "now" so the conversion happens exactly once.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub scope: String,
    pub jti: String,
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub refresh_token_expires_in: u64,
}

impl TokenResponse {
    /// Convert the wire response into a stored token, stamping absolute
    /// expiry instants relative to `now` (unix seconds).
    pub fn into_token(self, now: u64) -> OAuth2Token {
        OAuth2Token {
            expires_at: now + self.expires_in,
            refresh_token_expires_at: now + self.refresh_token_expires_in,
            scope: self.scope,
            jti: self.jti,
            token_type: self.token_type,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            refresh_token_expires_in: self.refresh_token_expires_in,
        }
    }
}

/// Static credentials identifying the client application to the
/// pre-authorization and exchange endpoints, independent of any end user.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: u64, refresh_expires_at: u64) -> OAuth2Token {
        OAuth2Token {
            scope: "CONNECT_READ CONNECT_WRITE".into(),
            jti: "jti-1".into(),
            token_type: "Bearer".into(),
            access_token: "at_1".into(),
            refresh_token: "rt_1".into(),
            expires_in: 3600,
            expires_at,
            refresh_token_expires_in: 7200,
            refresh_token_expires_at: refresh_expires_at,
        }
    }

    #[test]
    fn expiry_predicates_are_independent() {
        // Access token expired, refresh token still valid
        let t = token(1_000, 2_000);
        assert!(t.is_expired_at(1_500));
        assert!(!t.is_refresh_expired_at(1_500));

        // Refresh token expired, access token still valid
        let t = token(2_000, 1_000);
        assert!(!t.is_expired_at(1_500));
        assert!(t.is_refresh_expired_at(1_500));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let t = token(1_000, 2_000);
        assert!(!t.is_expired_at(999));
        assert!(t.is_expired_at(1_000));
    }

    #[test]
    fn refresh_window_boundary() {
        let buffer = Duration::from_secs(60);
        let now = 10_000;

        // expires_at = now + buffer - 1 → inside the window
        assert!(token(now + 59, 0).needs_refresh_at(now, buffer));
        // expires_at = now + buffer + 1 → outside the window
        assert!(!token(now + 61, 0).needs_refresh_at(now, buffer));
    }

    #[test]
    fn token_response_deserializes_snake_case() {
        let json = r#"{
            "scope": "CONNECT_READ",
            "jti": "4e7e9e4c",
            "token_type": "Bearer",
            "access_token": "at_abc",
            "refresh_token": "rt_def",
            "expires_in": 3599,
            "refresh_token_expires_in": 7199
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "at_abc");
        assert_eq!(response.expires_in, 3599);
        assert_eq!(response.refresh_token_expires_in, 7199);
    }

    #[test]
    fn into_token_stamps_absolute_expiries_once() {
        let response = TokenResponse {
            scope: "CONNECT_READ".into(),
            jti: "jti".into(),
            token_type: "Bearer".into(),
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_in: 3600,
            refresh_token_expires_in: 7200,
        };
        let token = response.into_token(1_000_000);
        assert_eq!(token.expires_at, 1_003_600);
        assert_eq!(token.refresh_token_expires_at, 1_007_200);
        assert_eq!(token.expires_in, 3600);
    }

    #[test]
    fn oauth1_credential_roundtrips_through_json() {
        let credential = OAuth1Credential {
            token: "t".into(),
            token_secret: "s".into(),
            mfa_token: Some("mfa".into()),
            mfa_expiration_timestamp: Some(1_678_395_361_856),
            domain: "garmin.com".into(),
        };
        let json = serde_json::to_string(&credential).unwrap();
        let back: OAuth1Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, credential);
    }

    #[test]
    fn oauth1_credential_omits_absent_mfa_fields() {
        let credential = OAuth1Credential {
            token: "t".into(),
            token_secret: "s".into(),
            mfa_token: None,
            mfa_expiration_timestamp: None,
            domain: "garmin.com".into(),
        };
        let json = serde_json::to_string(&credential).unwrap();
        assert!(!json.contains("mfa_token"));
        let back: OAuth1Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, credential);
    }

    #[test]
    fn oauth2_token_roundtrips_through_json() {
        let t = token(1_000, 2_000);
        let json = serde_json::to_string(&t).unwrap();
        let back: OAuth2Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
