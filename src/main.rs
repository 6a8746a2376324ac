//! Trac CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "trac")]
#[command(about = "Project tracker with changeset browsing and cross-references", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Environment directory (defaults to the current directory)
    #[arg(short, long = "env", default_value = ".", global = true)]
    env: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Open browser automatically
        #[arg(short, long)]
        open: bool,
    },
    /// Write a default trac.toml into the environment
    Init,
    /// Bring the revision cache up to date
    Sync,
    /// Print the unified diff between two path@rev pairs
    Diff {
        old_path: String,
        old_rev: String,
        new_path: String,
        new_rev: String,
    },
    /// Summarize a changeset
    Changeset { rev: String },
    /// Cross-reference maintenance and queries
    Xref {
        #[command(subcommand)]
        command: XrefCommands,
    },
    /// Show version
    Version,
}

#[derive(Subcommand)]
enum XrefCommands {
    /// Parse every object again and record its links
    Rebuild {
        /// Leave changeset messages alone
        #[arg(long)]
        skip_changesets: bool,
    },
    /// Links of one object
    Links {
        #[arg(value_name = "TYPE")]
        kind: String,
        id: String,
        /// Show the objects linking here instead
        #[arg(long)]
        back: bool,
    },
    /// Objects nobody links to and missing wiki pages
    Orphans,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("TRAC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(
            ["trac", "trac_core", "trac_versioncontrol", "trac_xref", "trac_web", "tower_http"]
                .map(|target| format!("{}={}", target, log_level))
                .join(","),
        )
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Trac v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Environment: {}", cli.env.display());

    match cli.command {
        Commands::Serve { port, host, open } => commands::serve(cli.env, host, port, open).await,
        Commands::Init => commands::init(cli.env),
        Commands::Sync => commands::sync(cli.env),
        Commands::Diff {
            old_path,
            old_rev,
            new_path,
            new_rev,
        } => commands::diff(cli.env, old_path, old_rev, new_path, new_rev),
        Commands::Changeset { rev } => commands::changeset(cli.env, rev),
        Commands::Xref { command } => match command {
            XrefCommands::Rebuild { skip_changesets } => {
                commands::xref_rebuild(cli.env, !skip_changesets)
            }
            XrefCommands::Links { kind, id, back } => commands::xref_links(cli.env, kind, id, back),
            XrefCommands::Orphans => commands::xref_orphans(cli.env),
        },
        Commands::Version => {
            println!("Trac v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
