use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rcc_auth::{AuthError, CloudAuth, CloudConfig};
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser)]
#[command(name = "rcc-auth", about = "Cloud login for the apps CLI")]
struct Cli {
    /// TOML config file (RCC_* environment variables still apply on top)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in through the browser
    Login,
    /// Revoke the stored token and forget it
    Logout,
    /// Print a valid access token, refreshing if needed
    Token,
    /// Show whether a login is stored and when it expires
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing subscriber (stderr, stdout carries command output)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rcc_auth=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => rcc_auth::config::load_config(path)?,
        None => CloudConfig::from_env().context("Invalid RCC_* environment")?,
    };
    debug!(base_url = %config.base_url, port = config.callback_port, "Configuration loaded");

    let auth = CloudAuth::new(config);

    match cli.command {
        Command::Login => {
            println!("Opening the browser to log in to {} ...", auth.config().base_url);
            auth.execute_auth_flow().await.context("Login failed")?;
            println!("Logged in.");
        }
        Command::Logout => match auth.revoke_token().await {
            Ok(()) => println!("Logged out."),
            Err(AuthError::NoAuthRecord) => println!("Not logged in, nothing to revoke."),
            Err(e) => return Err(e).context("Logout failed"),
        },
        Command::Token => {
            let token = auth.get_token().await.context("Could not get a token")?;
            if token.is_empty() {
                eprintln!("Not logged in. Run `rcc-auth login` first.");
                return Ok(ExitCode::FAILURE);
            }
            println!("{}", token);
        }
        Command::Status => match auth.status().await? {
            Some(status) if status.expired => println!(
                "Logged in; access token expired at {} (refreshed on next use)",
                status.expires_at
            ),
            Some(status) => println!(
                "Logged in; access token valid until {} (scope: {})",
                status.expires_at, status.scope
            ),
            None => println!("Not logged in."),
        },
    }

    Ok(ExitCode::SUCCESS)
}
