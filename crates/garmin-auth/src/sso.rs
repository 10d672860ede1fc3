//! SSO login flow
//!
//! Drives the browser-style sign-in sequence against the SSO surface:
//! establish a session, fetch the signin form, submit credentials, answer
//! an optional MFA challenge, then trade the resulting one-time ticket for
//! an OAuth1 credential and immediately exchange it for an OAuth2 token.
//!
//! The steps are coupled through cookies and a CSRF token, so each
//! `SsoClient` owns a dedicated cookie-holding HTTP client scoped to one
//! login attempt. Page scraping is deliberately narrow: three regex
//! extractions (CSRF field, `<title>`, ticket link), each with a single
//! failure mode when the pattern is absent.

use std::sync::LazyLock;

use async_trait::async_trait;
use common::Secret;
use regex::Regex;
use reqwest::header;
use tracing::{debug, info};

use crate::constants::{MFA_TITLE_MARKER, PREAUTHORIZED_PATH, SSO_USER_AGENT, SUCCESS_TITLE};
use crate::error::{Error, Result};
use crate::exchange::{exchange_with_base, fetch_consumer};
use crate::models::{ConsumerCredentials, OAuth1Credential, OAuth2Token};
use crate::oauth1::{Signer, percent_encode};

static CSRF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="_csrf"\s+value="(.+?)""#).expect("CSRF_RE is a valid regex pattern")
});

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<title>(.+?)</title>").expect("TITLE_RE is a valid regex pattern")
});

static TICKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"embed\?ticket=([^"]+)""#).expect("TICKET_RE is a valid regex pattern")
});

/// Source of one-time MFA codes.
///
/// Invoked mid-login when the account has MFA enabled. The whole flow
/// suspends until `code` resolves; an unbounded wait for user input is
/// expected here and is not an error.
#[async_trait]
pub trait MfaCodeSource: Send + Sync {
    async fn code(&self) -> Result<String>;
}

/// SSO login client for one domain.
///
/// Holds its own cookie-store-backed HTTP client; create a fresh instance
/// per login attempt so session state never leaks between attempts.
pub struct SsoClient {
    http: reqwest::Client,
    domain: String,
    sso_base: String,
    api_base: String,
    consumer: Option<ConsumerCredentials>,
}

impl SsoClient {
    /// Create a login client for `domain` (`garmin.com` or `garmin.cn`).
    pub fn new(domain: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(SSO_USER_AGENT)
            .build()
            .map_err(|e| Error::Http(format!("building sso http client: {e}")))?;
        let sso_base = format!("https://sso.{domain}/sso");
        let api_base = format!("https://connectapi.{domain}");
        Ok(Self {
            http,
            domain,
            sso_base,
            api_base,
            consumer: None,
        })
    }

    /// Use configured consumer credentials instead of the bootstrap fetch.
    pub fn with_consumer(mut self, consumer: ConsumerCredentials) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Override the SSO and API base URLs (tests, proxies).
    pub fn with_endpoints(
        mut self,
        sso_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        self.sso_base = sso_base.into();
        self.api_base = api_base.into();
        self
    }

    /// Run the full login flow.
    ///
    /// On success returns the long-lived OAuth1 credential together with a
    /// freshly exchanged OAuth2 token. Nothing is persisted here; storing
    /// the result is the caller's responsibility. On failure no partial
    /// credential escapes.
    pub async fn login(
        &self,
        email: &str,
        password: &Secret<String>,
        mfa: Option<&dyn MfaCodeSource>,
    ) -> Result<(OAuth1Credential, OAuth2Token)> {
        let embed_url = format!("{}/embed", self.sso_base);
        let embed_params = [
            ("id", "gauth-widget"),
            ("embedWidget", "true"),
            ("gauthHost", self.sso_base.as_str()),
        ];

        debug!("establishing sso session");
        let response = self
            .http
            .get(&embed_url)
            .query(&embed_params)
            .send()
            .await
            .map_err(|e| Error::Http(format!("sso embed request failed: {e}")))?;
        ensure_success(response).await?;

        // The signin calls all carry the gauth-widget parameter set, with
        // the embed endpoint as the post-login redirect target.
        let signin_params = [
            ("id", "gauth-widget"),
            ("embedWidget", "true"),
            ("gauthHost", embed_url.as_str()),
            ("service", embed_url.as_str()),
            ("source", embed_url.as_str()),
            ("redirectAfterAccountLoginUrl", embed_url.as_str()),
            ("redirectAfterAccountCreationUrl", embed_url.as_str()),
        ];
        let signin_url = format!("{}/signin", self.sso_base);

        debug!("fetching signin page");
        let response = self
            .http
            .get(&signin_url)
            .query(&signin_params)
            .send()
            .await
            .map_err(|e| Error::Http(format!("signin page request failed: {e}")))?;
        let response = ensure_success(response).await?;
        // Final post-redirect URL doubles as the Referer for the submission
        let referer = response.url().to_string();
        let page = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading signin page: {e}")))?;
        let csrf = extract_csrf(&page)?;

        debug!("submitting credentials");
        let response = self
            .http
            .post(&signin_url)
            .query(&signin_params)
            .header(header::REFERER, &referer)
            .form(&[
                ("username", email),
                ("password", password.expose().as_str()),
                ("embed", "true"),
                ("_csrf", csrf.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("credential submission failed: {e}")))?;
        let response = ensure_success(response).await?;
        let submit_referer = response.url().to_string();
        let mut page = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading credential response: {e}")))?;
        let mut title = extract_title(&page)?;

        if title.contains(MFA_TITLE_MARKER) {
            let source = mfa.ok_or(Error::MfaRequired)?;
            info!("mfa challenge received, waiting for code");
            let code = source.code().await?;
            // Fresh CSRF token from the credential-submission response, not
            // from the MFA page
            let csrf = extract_csrf(&page)?;
            let mfa_url = format!("{}/verifyMFA/loginEnterMfaCode", self.sso_base);
            let response = self
                .http
                .post(&mfa_url)
                .query(&signin_params)
                .header(header::REFERER, &submit_referer)
                .form(&[
                    ("mfa-code", code.as_str()),
                    ("embed", "true"),
                    ("_csrf", csrf.as_str()),
                    ("fromPage", "setupEnterMfaCode"),
                ])
                .send()
                .await
                .map_err(|e| Error::Http(format!("mfa verification request failed: {e}")))?;
            let response = ensure_success(response).await?;
            page = response
                .text()
                .await
                .map_err(|e| Error::Http(format!("reading mfa response: {e}")))?;
            title = extract_title(&page)?;
        }

        if title != SUCCESS_TITLE {
            return Err(Error::LoginFailed(title));
        }

        let ticket = extract_ticket(&page)?;
        debug!("login ticket extracted");

        let consumer = match &self.consumer {
            Some(consumer) => consumer.clone(),
            None => fetch_consumer(&self.http).await?,
        };

        let credential = self.preauthorized(&consumer, &ticket).await?;
        info!(domain = %self.domain, "oauth1 credential issued");

        let token = exchange_with_base(&self.http, &consumer, &credential, &self.api_base).await?;
        Ok((credential, token))
    }

    /// Trade the one-time login ticket for an OAuth1 credential via the
    /// consumer-only-signed pre-authorization endpoint.
    async fn preauthorized(
        &self,
        consumer: &ConsumerCredentials,
        ticket: &str,
    ) -> Result<OAuth1Credential> {
        let login_url = format!("{}/embed", self.sso_base);
        let url = format!(
            "{}{}?ticket={}&login-url={}&accepts-mfa-tokens=true",
            self.api_base,
            PREAUTHORIZED_PATH,
            percent_encode(ticket),
            percent_encode(&login_url),
        );

        let signer = Signer::new(&consumer.consumer_key, &consumer.consumer_secret);
        let authorization = signer.sign("GET", &url, None, &[])?;

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| Error::Http(format!("preauthorized request failed: {e}")))?;
        let response = ensure_success(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading preauthorized response: {e}")))?;

        parse_credential_response(&body, &self.domain)
    }
}

/// Map a non-2xx response to `Error::Status`, passing 2xx through.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}

fn extract_csrf(page: &str) -> Result<String> {
    CSRF_RE
        .captures(page)
        .map(|captures| captures[1].to_string())
        .ok_or(Error::CsrfNotFound)
}

fn extract_title(page: &str) -> Result<String> {
    TITLE_RE
        .captures(page)
        .map(|captures| captures[1].to_string())
        .ok_or(Error::TitleNotFound)
}

fn extract_ticket(page: &str) -> Result<String> {
    TICKET_RE
        .captures(page)
        .map(|captures| captures[1].to_string())
        .ok_or(Error::TicketNotFound)
}

/// Parse the pre-authorization response, a URL-encoded query string (not
/// JSON): `oauth_token=...&oauth_token_secret=...[&mfa_token=...]`.
fn parse_credential_response(body: &str, domain: &str) -> Result<OAuth1Credential> {
    let mut token = None;
    let mut token_secret = None;
    let mut mfa_token = None;
    let mut mfa_expiration_timestamp = None;

    for (name, value) in url::form_urlencoded::parse(body.as_bytes()) {
        match name.as_ref() {
            "oauth_token" => token = Some(value.into_owned()),
            "oauth_token_secret" => token_secret = Some(value.into_owned()),
            "mfa_token" => mfa_token = Some(value.into_owned()),
            "mfa_expiration_timestamp" => {
                mfa_expiration_timestamp = Some(value.parse::<u64>().map_err(|e| {
                    Error::InvalidResponse(format!("bad mfa_expiration_timestamp: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let token = token
        .ok_or_else(|| Error::InvalidResponse("oauth_token missing from preauthorized response".into()))?;
    let token_secret = token_secret.ok_or_else(|| {
        Error::InvalidResponse("oauth_token_secret missing from preauthorized response".into())
    })?;

    Ok(OAuth1Credential {
        token,
        token_secret,
        mfa_token,
        mfa_expiration_timestamp,
        domain: domain.to_string(),
    })
}
