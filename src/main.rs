#![deny(clippy::mod_module_files)]
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use study_sync::config::SyncConfig;
use study_sync::merge::Resolution;

mod commands;

#[derive(Parser)]
#[command(name = "study-sync", about = "Keep study progress in sync across devices")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show local state and sync metadata
    Status,
    /// Run one sync cycle against the remote
    Sync {
        /// Settle a tie conflict: local, remote or merge
        #[arg(long)]
        resolve: Option<Resolution>,
    },
    /// Read edits from stdin and sync them as they settle
    Watch,
    /// Load the question catalog from the enabled repo sources
    Catalog {
        /// Load one paper's questions instead of the index
        #[arg(long)]
        paper: Option<String>,
    },
    /// Manage catalog repo sources
    Sources {
        #[command(subcommand)]
        action: SourcesCmd,
    },
    /// Back up or restore answer drafts
    Drafts {
        #[command(subcommand)]
        action: DraftsCmd,
    },
}

#[derive(Subcommand)]
enum SourcesCmd {
    /// List configured sources
    List,
    /// Add a source
    Add {
        id: String,
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a source (builtin sources cannot be removed)
    Rm { id: String },
    Enable { id: String },
    Disable { id: String },
}

#[derive(Subcommand)]
enum DraftsCmd {
    /// List draft ids
    List,
    /// Write every draft to a JSON file
    Export { file: PathBuf },
    /// Load drafts from a JSON file written by `export`
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "study_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load()?;
    let ctx = commands::Context::open(config)?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Cmd::Status => commands::status::handle(&ctx, &mut stdout),
        Cmd::Sync { resolve } => commands::sync::handle(&ctx, resolve, &mut stdout).await,
        Cmd::Watch => commands::watch::handle(&ctx, &mut stdout).await,
        Cmd::Catalog { paper } => commands::catalog::handle(&ctx, paper, &mut stdout).await,
        Cmd::Sources { action } => match action {
            SourcesCmd::List => commands::sources::list(&ctx, &mut stdout),
            SourcesCmd::Add { id, url, name } => {
                commands::sources::add(&ctx, id, url, name, &mut stdout)
            }
            SourcesCmd::Rm { id } => commands::sources::remove(&ctx, &id, &mut stdout),
            SourcesCmd::Enable { id } => {
                commands::sources::set_enabled(&ctx, &id, true, &mut stdout)
            }
            SourcesCmd::Disable { id } => {
                commands::sources::set_enabled(&ctx, &id, false, &mut stdout)
            }
        },
        Cmd::Drafts { action } => match action {
            DraftsCmd::List => commands::drafts::list(&ctx, &mut stdout),
            DraftsCmd::Export { file } => commands::drafts::export(&ctx, &file, &mut stdout),
            DraftsCmd::Import { file } => commands::drafts::import(&ctx, &file, &mut stdout),
        },
    }
}
