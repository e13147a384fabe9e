//! MercadoLibre token keeper
//!
//! Run-to-completion CLI around `meli_auth::Orchestrator`:
//! 1. Loads config (optional TOML + env overlay) and opens the `.env` store
//! 2. Runs one lifecycle step: generate PKCE, print the authorization URL,
//!    exchange the pasted code, or refresh the token pair
//! 3. Exits 0 when tokens are ready or user authorization is pending,
//!    non-zero with a descriptive message otherwise
//!
//! Invocations against one store must not overlap; schedule one run at a time.

mod config;
mod error;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meli_auth::{CredentialStore, OAuthConfig, Orchestrator, Outcome, lifecycle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Failure;

#[derive(Parser, Debug)]
#[command(name = "meli-token", version, about = "Keep MercadoLibre OAuth tokens fresh")]
struct Cli {
    /// Config file (defaults to CONFIG_PATH, then ./meli-token.toml if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Advance the credential lifecycle by one step (default)
    Run {
        /// Refresh even if the access token is still valid
        #[arg(long)]
        force: bool,
    },
    /// Exchange the authorization code, or the whole redirect URL it came back on
    Code { input: String },
    /// Print the lifecycle state without contacting the provider
    Status,
    /// Discard the PKCE pair and tokens to start a new authorization
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // JSON logs on stderr; stdout carries only the URL and status lines
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let failure = Failure::classify(&e);
            error!(error = %format!("{e:#}"), ?failure, "run failed");
            eprintln!("error: {e:#}");
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config_path = Config::resolve_path(cli.config.as_deref());
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!("no config file, using defaults"),
    }

    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load configuration".to_owned(),
    })?;

    let store = CredentialStore::open(&config.store.path)
        .await
        .context("failed to open credential store")?;
    let command = cli.command.unwrap_or(Command::Run { force: false });

    match command {
        Command::Run { force } => {
            let oauth = client_config(&config, &store).await?;
            let outcome = Orchestrator::new(&oauth, &store, oauth.http_client()?)
                .force_refresh(force)
                .run()
                .await
                .context("credential lifecycle run failed")?;
            report(&outcome);
        }
        Command::Code { input } => {
            let oauth = client_config(&config, &store).await?;
            let outcome = Orchestrator::new(&oauth, &store, oauth.http_client()?)
                .accept_authorization_code(&input)
                .await
                .context("failed to exchange pasted authorization code")?;
            report(&outcome);
        }
        // status and reset only touch the store; no client identity needed
        Command::Status => {
            let margin = Duration::from_secs(config.provider.refresh_margin_secs);
            let state = lifecycle::status(&store, margin).await?;
            println!("{}", state.as_str());
        }
        Command::Reset => {
            lifecycle::reset(&store)
                .await
                .context("failed to reset credential lifecycle")?;
            println!("Credential lifecycle reset. Run `meli-token run` to start a new authorization.");
        }
    }

    Ok(())
}

/// Client identity from config and env, with gaps filled from the store.
async fn client_config(config: &Config, store: &CredentialStore) -> Result<OAuthConfig> {
    let state = store.load().await.context("failed to read credential store")?;
    let oauth = config
        .oauth_config(&state)
        .context("client identity incomplete")?;
    info!(
        store = %store.path().display(),
        token_url = %oauth.token_endpoint,
        timeout_secs = oauth.timeout.as_secs(),
        "configuration loaded"
    );
    Ok(oauth)
}

fn report(outcome: &Outcome) {
    if outcome.has_tokens() {
        println!("token is ready for work");
        return;
    }
    if let Outcome::AuthorizationRequired {
        url,
        verifier_generated,
    } = outcome
    {
        info!(verifier_generated = *verifier_generated, "waiting for user authorization");
        println!("Open this URL in a browser and authorize the application:");
        println!("{url}");
        println!("Then run `meli-token code '<redirect URL or code>'`.");
    }
}
