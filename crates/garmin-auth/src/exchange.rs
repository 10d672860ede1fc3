//! OAuth1 → OAuth2 token exchange
//!
//! The exchange endpoint mints a fresh OAuth2 bearer token from a valid
//! OAuth1 credential. This is the only refresh path: the OAuth2 token's own
//! refresh token is never sent back. The request is a signed form POST; the
//! MFA token rides along as a signed body parameter when the credential
//! carries one.

use crate::constants::{CONSUMER_BOOTSTRAP_URL, EXCHANGE_PATH};
use crate::error::{Error, Result};
use crate::models::{ConsumerCredentials, OAuth1Credential, OAuth2Token, TokenResponse, now_epoch};
use crate::oauth1::Signer;

/// Exchange an OAuth1 credential for a fresh OAuth2 token on the
/// credential's own domain.
pub async fn exchange(
    client: &reqwest::Client,
    consumer: &ConsumerCredentials,
    credential: &OAuth1Credential,
) -> Result<OAuth2Token> {
    let base = format!("https://connectapi.{}", credential.domain);
    exchange_with_base(client, consumer, credential, &base).await
}

/// Exchange against an explicit API base URL (tests, proxies).
pub async fn exchange_with_base(
    client: &reqwest::Client,
    consumer: &ConsumerCredentials,
    credential: &OAuth1Credential,
    base: &str,
) -> Result<OAuth2Token> {
    let url = format!("{base}{EXCHANGE_PATH}");

    let mut form: Vec<(&str, &str)> = Vec::new();
    if let Some(mfa_token) = credential.mfa_token.as_deref() {
        form.push(("mfa_token", mfa_token));
    }

    let signer = Signer::new(&consumer.consumer_key, &consumer.consumer_secret);
    let authorization = signer.sign(
        "POST",
        &url,
        Some((&credential.token, &credential.token_secret)),
        &form,
    )?;

    let response = client
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Exchange(format!(
            "exchange endpoint returned {status}: {body}"
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Exchange(format!("invalid exchange response: {e}")))?;
    Ok(token.into_token(now_epoch()))
}

/// Fetch the public consumer key/secret from the well-known bootstrap
/// location. Used when no consumer credentials are configured.
pub async fn fetch_consumer(client: &reqwest::Client) -> Result<ConsumerCredentials> {
    let response = client
        .get(CONSUMER_BOOTSTRAP_URL)
        .send()
        .await
        .map_err(|e| Error::Http(format!("consumer bootstrap request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid consumer bootstrap response: {e}")))
}
