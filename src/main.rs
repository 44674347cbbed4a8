use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use std::sync::Arc;

use portfolio_gateway::auth::SqliteCredentialStore;
use portfolio_gateway::config::{CliArgs, Command, Config};
use portfolio_gateway::{ApiClient, GatewayOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap so env-backed flags see it
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("API: {}", config.base_url);
    tracing::debug!("Credential store: {}", config.credentials_db.display());

    let store = Arc::new(
        SqliteCredentialStore::open(&config.credentials_db)
            .context("Failed to open credential store")?,
    );
    let client = ApiClient::new(GatewayOptions::from(&config), store)?;

    client.events().subscribe(Arc::new(|| {
        tracing::warn!("Session is no longer valid. Run `portfolio-gateway login` to sign in again.");
    }));

    match args.command {
        Command::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => Input::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            client.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
        }

        Command::Logout => {
            client.logout().await?;
            println!("👋 Logged out");
        }

        Command::Status => {
            if client.is_authenticated().await {
                println!("✅ Authenticated");
            } else {
                println!("❌ Not authenticated");
                std::process::exit(1);
            }
        }

        Command::Get { path } => {
            let value: serde_json::Value = client.get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
