//! Dotloop command-line client
//!
//! Signs the user in through the relay, keeps the resulting credentials in a
//! local file, and lists or downloads resources through the relay's
//! `/proxy` prefix. The client secret never reaches this process.

mod commands;
mod config;
mod login;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotloop_auth::{FileCredentialStore, RelayTokenEndpoint, TokenManager};
use dotloop_client::{ApiRelay, DotloopApi, LoopQuery};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "dotloop-cli", version, about = "Dotloop client backed by dotloop-proxy")]
struct Cli {
    /// Config file (default: $CONFIG_PATH, then ./dotloop-cli.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in through the browser and store the tokens.
    Login,
    /// Delete stored credentials.
    Logout,
    /// Show whether stored credentials are usable.
    Status,
    /// List profiles.
    Profiles,
    /// List loops in a profile.
    Loops(LoopsArgs),
    /// List folders in a loop.
    Folders(LoopArgs),
    /// List documents in a folder.
    Documents(FolderArgs),
    /// Download a document.
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
struct LoopsArgs {
    #[arg(long)]
    profile: String,
    #[arg(long)]
    batch_number: Option<u32>,
    #[arg(long)]
    batch_size: Option<u32>,
    /// e.g. `updated:desc`
    #[arg(long)]
    sort: Option<String>,
    /// e.g. `updated_min=1700000000000`
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Debug, Args)]
struct LoopArgs {
    #[arg(long)]
    profile: String,
    #[arg(long = "loop")]
    loop_id: String,
}

#[derive(Debug, Args)]
struct FolderArgs {
    #[command(flatten)]
    target: LoopArgs,
    #[arg(long)]
    folder: String,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    #[command(flatten)]
    target: FolderArgs,
    #[arg(long)]
    document: String,
    /// File or directory to write to (default: server file name in the current directory).
    #[arg(long)]
    out: Option<PathBuf>,
}

impl From<&LoopsArgs> for LoopQuery {
    fn from(args: &LoopsArgs) -> Self {
        LoopQuery {
            batch_number: args.batch_number,
            batch_size: args.batch_size,
            sort: args.sort.clone(),
            filter: args.filter.clone(),
            include_details: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Human-readable logs on stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let source = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&source)
        .with_context(|| format!("failed to load config from {}", source.path.display()))?;
    let credentials_path = config.credentials_path();
    debug!(
        relay_url = %config.client.relay_url,
        credentials = %credentials_path.display(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let endpoint = Arc::new(RelayTokenEndpoint::new(
        http.clone(),
        config.client.relay_url.as_str(),
    ));
    let store = Arc::new(FileCredentialStore::new(credentials_path.clone()));
    let manager = Arc::new(TokenManager::load(config.dotloop.clone(), endpoint, store).await);
    let api = || {
        DotloopApi::new(ApiRelay::new(
            http.clone(),
            config.resource_base_url(),
            manager.clone(),
        ))
    };
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Login => {
            let (listener, path) = login::bind_callback(&config.dotloop.redirect_uri).await?;
            login::login(&manager, listener, &path, login::CALLBACK_TIMEOUT, |url| {
                eprintln!("Open this URL in your browser to sign in:\n\n  {url}\n");
            })
            .await?;
            println!(
                "signed in; credentials saved to {}",
                credentials_path.display()
            );
        }
        Command::Logout => {
            manager
                .clear()
                .await
                .context("failed to clear stored credentials")?;
            println!("signed out");
        }
        Command::Status => commands::status(&manager, &credentials_path, &mut stdout).await?,
        Command::Profiles => commands::profiles(&api(), &mut stdout).await?,
        Command::Loops(args) => {
            commands::loops(&api(), &args.profile, &LoopQuery::from(&args), &mut stdout).await?
        }
        Command::Folders(args) => {
            commands::folders(&api(), &args.profile, &args.loop_id, &mut stdout).await?
        }
        Command::Documents(args) => {
            commands::documents(
                &api(),
                &args.target.profile,
                &args.target.loop_id,
                &args.folder,
                &mut stdout,
            )
            .await?
        }
        Command::Download(args) => {
            let folder = &args.target;
            let path = commands::download(
                &api(),
                [
                    folder.target.profile.as_str(),
                    folder.target.loop_id.as_str(),
                    folder.folder.as_str(),
                    args.document.as_str(),
                ],
                args.out.as_deref(),
            )
            .await?;
            println!("saved {}", path.display());
        }
    }
    Ok(())
}
