//! Magazine Console
//!
//! Command-line client for the magazine GraphQL API:
//! 1. Signs in with email and password, optionally remembering the session
//! 2. Sends queries with the current access token
//! 3. Renews expired access tokens transparently and replays the request
//! 4. Signs out, clearing local credentials even if the server is unreachable

mod config;
mod console;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console_auth::{Persistence, now_millis};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};
use crate::console::Console;

#[derive(Parser)]
#[command(name = "magazine-console", version)]
#[command(about = "Command-line console for the magazine GraphQL API")]
struct Cli {
    /// Config file (defaults to CONFIG_PATH, then ./magazine-console.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GraphQL endpoint, overriding api.endpoint
    #[arg(long, env = "MAGAZINE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Credential file, overriding session.credential_file
    #[arg(long, global = true)]
    credential_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password (password from MAGAZINE_PASSWORD or login.password_file)
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Keep the session on disk for later invocations
        #[arg(long)]
        remember: bool,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Run a GraphQL document and print its data as JSON
    Query {
        /// File containing the GraphQL document
        file: PathBuf,
        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,
        #[arg(long)]
        operation: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let (path, explicit) = Config::resolve_path(cli.config.as_deref());
    let mut config = if explicit || path.exists() {
        Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        Config::parse("").context("failed to build default config")?
    };
    config
        .apply_overrides(cli.endpoint.clone(), cli.credential_file.clone())
        .context("invalid command-line override")?;
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let console = Console::connect(&config).await?;

    match cli.command {
        Command::Login { email, remember } => {
            let email = email
                .or_else(|| config.login.email.clone())
                .context("no email given; pass --email or set login.email")?;
            let persistence = if remember || config.session.remember {
                Persistence::Remember
            } else {
                Persistence::Session
            };
            let user = console
                .login(&email, config.password()?, persistence)
                .await?;
            println!("Signed in as {} ({})", user.display_name, user.role);
            if persistence == Persistence::Session {
                println!("Session not saved; pass --remember to stay signed in");
            }
        }
        Command::Logout => {
            let confirmed = console.logout().await?;
            if confirmed {
                println!("Signed out");
            } else {
                println!("Signed out locally");
            }
        }
        Command::Whoami => {
            let me = console.whoami().await?;
            print_json(&me)?;
            if let Some(expires_at) = console.store().credential().and_then(|c| c.expires_at) {
                let remaining = expires_at.saturating_sub(now_millis()) / 1000;
                println!("Access token expires in {remaining}s");
            }
        }
        Command::Query {
            file,
            variables,
            operation,
        } => {
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let variables = match variables {
                Some(raw) => serde_json::from_str(&raw).context("--variables is not valid JSON")?,
                None => serde_json::json!({}),
            };
            let data = console
                .query(&document, variables, operation.as_deref())
                .await?;
            print_json(&data)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(config.log_format);

    info!(
        endpoint = %config.api.endpoint,
        credential_file = %config.session.credential_file.display(),
        headers = config.api.headers.len(),
        "configuration loaded"
    );

    let result = run(cli, config).await;
    if let Err(ref e) = result {
        let signed_out = e
            .downcast_ref::<auth_transport::Error>()
            .is_some_and(auth_transport::Error::is_unauthorized);
        if signed_out {
            eprintln!("Session expired or missing; run `magazine-console login`");
        }
    }
    result
}
