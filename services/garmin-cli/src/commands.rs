//! CLI command implementations

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::Secret;
use tracing::info;

use garmin_auth::{ConsumerCredentials, MfaCodeSource, SsoClient, fetch_consumer};
use garmin_client::ApiClient;
use garmin_tokens::{
    AuthState, ConnectExchanger, CredentialStore, FileCredentialStore, FileTokenStorage,
    SavedCredentials, TokenManager,
};

use crate::config::Config;

/// MFA handler prompting on stdin. Login suspends until a code is entered.
struct StdinMfa;

#[async_trait]
impl MfaCodeSource for StdinMfa {
    async fn code(&self) -> garmin_auth::Result<String> {
        tokio::task::spawn_blocking(|| prompt("MFA code: "))
            .await
            .map_err(|e| garmin_auth::Error::Mfa(format!("mfa prompt task failed: {e}")))?
            .map_err(|e| garmin_auth::Error::Mfa(format!("reading mfa code: {e}")))
    }
}

fn prompt(label: &str) -> std::io::Result<String> {
    use std::io::Write;
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn prompt_async(label: &'static str) -> Result<String> {
    tokio::task::spawn_blocking(move || prompt(label))
        .await
        .context("prompt task failed")?
        .context("reading input")
}

pub async fn login(config: &Config, email_arg: Option<String>, save: bool) -> Result<()> {
    let data_dir = config.data_dir()?;
    let storage = Arc::new(FileTokenStorage::new(&data_dir));
    let credential_store = FileCredentialStore::in_dir(&data_dir);
    let saved = credential_store.get().await?;

    let email = match email_arg {
        Some(email) => email,
        None => match &saved {
            Some(saved) => saved.email.clone(),
            None => prompt_async("Email: ").await?,
        },
    };

    // Saved password applies only to the saved account
    let password = match std::env::var("GARMIN_PASSWORD") {
        Ok(password) => password,
        Err(_) => match &saved {
            Some(saved) if saved.email == email => saved.password.clone(),
            _ => prompt_async("Password: ").await?,
        },
    };
    let password = Secret::new(password);

    let mut sso = SsoClient::new(config.domain())?;
    if let Some(consumer) = config.consumer_credentials() {
        sso = sso.with_consumer(consumer);
    }

    let (credential, token) = sso.login(&email, &password, Some(&StdinMfa)).await?;
    info!(domain = %credential.domain, "login complete, storing tokens");

    let manager = TokenManager::new(storage);
    manager.save_tokens(credential, token).await?;

    if save {
        credential_store
            .save(&SavedCredentials {
                email,
                password: password.expose().clone(),
            })
            .await?;
        println!("Credentials saved to {}", data_dir.display());
    }

    println!("Login successful.");
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    let storage = Arc::new(FileTokenStorage::new(config.data_dir()?));
    let manager = TokenManager::new(storage);
    let status = manager.get_token_status().await?;

    println!(
        "OAuth1 token: {}",
        if status.oauth1_present { "present" } else { "none" }
    );
    match (status.oauth2_present, status.oauth2_expired) {
        (true, false) => {
            println!("OAuth2 token: valid");
            if let Some(expires_at) = status.oauth2_expires_at {
                println!("  expires_at: {expires_at}");
            }
        }
        (true, true) => println!("OAuth2 token: expired"),
        (false, _) => println!("OAuth2 token: none"),
    }
    if let Some(domain) = &status.domain {
        println!("Domain:       {domain}");
    }

    match status.state() {
        AuthState::Authenticated => {}
        AuthState::NeedsRefresh => {
            println!("\nThe OAuth2 token will be refreshed on the next request.");
        }
        AuthState::NeedsReauthentication => {
            println!("\nRun 'garmin-cli login' to authenticate.");
        }
    }
    Ok(())
}

pub async fn logout(config: &Config, forget: bool) -> Result<()> {
    let data_dir = config.data_dir()?;
    let storage = Arc::new(FileTokenStorage::new(&data_dir));
    let manager = TokenManager::new(storage);
    manager.clear_tokens().await?;

    if forget {
        FileCredentialStore::in_dir(&data_dir).delete().await?;
    }

    println!("Logged out.");
    Ok(())
}

pub async fn request(config: &Config, subdomain: &str, path: &str) -> Result<()> {
    let storage = Arc::new(FileTokenStorage::new(config.data_dir()?));
    let consumer = resolve_consumer(config).await?;
    let exchanger = Arc::new(ConnectExchanger::new(consumer)?);
    let manager = Arc::new(TokenManager::new(storage).with_exchanger(exchanger));

    let client = ApiClient::new(manager, config.domain())?;
    let body = client.get(subdomain, path).await?;
    println!("{body}");
    Ok(())
}

/// Configured consumer credentials, or the public bootstrap pair.
async fn resolve_consumer(config: &Config) -> Result<ConsumerCredentials> {
    if let Some(consumer) = config.consumer_credentials() {
        return Ok(consumer);
    }
    let http = reqwest::Client::builder()
        .build()
        .context("building http client")?;
    Ok(fetch_consumer(&http).await?)
}
