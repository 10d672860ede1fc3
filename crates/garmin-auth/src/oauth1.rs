//! OAuth1 request signing (HMAC-SHA1)
//!
//! Produces the `Authorization: OAuth ...` header for the pre-authorization
//! and exchange endpoints. The parameter encoding, ordering, and base-string
//! construction must match the server bit-for-bit or the signature is
//! rejected, so everything here is deterministic given a nonce and a
//! timestamp; only `sign` draws fresh randomness.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha1::Sha1;
use url::Url;

use crate::error::{Error, Result};
use crate::models::now_epoch;

type HmacSha1 = Hmac<Sha1>;

/// OAuth1 signer bound to one consumer key/secret pair.
pub struct Signer {
    consumer_key: String,
    consumer_secret: String,
}

impl Signer {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    /// Sign a request with a fresh nonce and the current timestamp.
    ///
    /// `token` is the OAuth token/token-secret pair; pass `None` for the
    /// consumer-only signing used by the pre-authorization call, before any
    /// token exists. `body_params` are form parameters that must be covered
    /// by the signature in addition to the URL query parameters.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        token: Option<(&str, &str)>,
        body_params: &[(&str, &str)],
    ) -> Result<String> {
        self.sign_at(method, url, token, body_params, now_epoch(), &generate_nonce())
    }

    /// Sign a request with an explicit timestamp and nonce.
    ///
    /// Deterministic: the same inputs always produce the same header.
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        token: Option<(&str, &str)>,
        body_params: &[(&str, &str)],
        timestamp: u64,
        nonce: &str,
    ) -> Result<String> {
        let oauth_params = self.oauth_params(token.map(|(t, _)| t), timestamp, nonce);
        let base = base_string(method, url, &oauth_params, body_params)?;

        let token_secret = token.map(|(_, s)| s).unwrap_or("");
        let key = format!(
            "{}&{}",
            percent_encode(&self.consumer_secret),
            percent_encode(token_secret)
        );
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| Error::Signing(format!("hmac key setup: {e}")))?;
        mac.update(base.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let mut header_params: Vec<(String, String)> = oauth_params
            .iter()
            .map(|(name, value)| (percent_encode(name), percent_encode(value)))
            .collect();
        header_params.push(("oauth_signature".into(), percent_encode(&signature)));
        header_params.sort();

        let rendered: Vec<String> = header_params
            .iter()
            .map(|(name, value)| format!("{name}=\"{value}\""))
            .collect();
        Ok(format!("OAuth {}", rendered.join(", ")))
    }

    /// The standard oauth_* protocol parameters for one request.
    fn oauth_params(&self, token: Option<&str>, timestamp: u64, nonce: &str) -> Vec<(String, String)> {
        let mut params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some(token) = token {
            params.push(("oauth_token".to_string(), token.to_string()));
        }
        params
    }
}

/// Build the signature base string:
/// `METHOD&enc(base-url)&enc(sorted-parameter-string)`.
///
/// The parameter set is the oauth_* parameters plus every URL query
/// parameter plus every body parameter, each name and value
/// percent-encoded, then sorted byte-lexicographically by name and value.
fn base_string(
    method: &str,
    url: &str,
    oauth_params: &[(String, String)],
    body_params: &[(&str, &str)],
) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::Signing(format!("invalid url {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Signing(format!("url has no host: {url}")))?;

    let mut base_url = format!("{}://{host}", parsed.scheme());
    if let Some(port) = parsed.port() {
        base_url.push_str(&format!(":{port}"));
    }
    base_url.push_str(parsed.path());

    let mut encoded: Vec<(String, String)> = Vec::new();
    for (name, value) in oauth_params {
        encoded.push((percent_encode(name), percent_encode(value)));
    }
    for (name, value) in parsed.query_pairs() {
        encoded.push((percent_encode(&name), percent_encode(&value)));
    }
    for (name, value) in body_params {
        encoded.push((percent_encode(name), percent_encode(value)));
    }
    encoded.sort();

    let pairs: Vec<String> = encoded
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    let param_string = pairs.join("&");

    Ok(format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(&base_url),
        percent_encode(&param_string)
    ))
}

/// Percent-encode per RFC 3986: everything except unreserved characters
/// (`A-Z a-z 0-9 - . _ ~`) becomes `%XX` with uppercase hex, byte-wise over
/// the UTF-8 encoding.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Generate a collision-resistant nonce (16 random bytes, URL-safe base64).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
