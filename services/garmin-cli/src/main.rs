//! Garmin Connect CLI
//!
//! Thin front end over the auth/token/client crates:
//! 1. `login` runs the SSO flow and stores both tokens
//! 2. `status` shows what is stored and whether a re-login is needed
//! 3. `logout` deletes stored tokens
//! 4. `request` performs a raw authenticated GET (refreshing as needed)

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "garmin-cli", about = "Garmin Connect authentication client", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store OAuth tokens
    Login {
        /// Account email (prompted when omitted and not saved)
        #[arg(long)]
        email: Option<String>,
        /// Save email/password for later logins (stored in plain text)
        #[arg(long)]
        save: bool,
    },
    /// Show the stored token status
    Status,
    /// Delete stored tokens
    Logout {
        /// Also delete saved email/password
        #[arg(long)]
        forget: bool,
    },
    /// Perform a raw authenticated GET request and print the body
    Request {
        /// Request path, e.g. /userprofile-service/userprofile/profileStatus
        path: String,
        /// Host subdomain under the configured domain
        #[arg(long, default_value = "connectapi")]
        subdomain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Login { email, save } => commands::login(&config, email, save).await,
        Command::Status => commands::status(&config).await,
        Command::Logout { forget } => commands::logout(&config, forget).await,
        Command::Request { path, subdomain } => commands::request(&config, &subdomain, &path).await,
    }
}
