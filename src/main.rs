//! listsync: offline-first list sync
//!
//! ## Usage
//!
//! ```bash
//! # Run the sync gateway
//! listsync serve --http-port 8787 --database /data/listsync.db
//!
//! # Edit the local list and sync it
//! listsync client add "Milk"
//! listsync client list
//! listsync client sync
//!
//! # Keep pushing and polling in the background
//! listsync client watch
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use listsync::cli::{self, ClientCommands};
use listsync::config::Config;

#[derive(Parser)]
#[command(name = "listsync")]
#[command(about = "Offline-first list sync over an append-only change log")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "listsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync gateway
    Serve {
        /// HTTP API port
        #[arg(long, env = "LISTSYNC_HTTP_PORT")]
        http_port: Option<u16>,

        /// Change log database
        #[arg(long, env = "LISTSYNC_DATABASE")]
        database: Option<PathBuf>,

        /// Shared password for /auth/verify
        #[arg(long, env = "LISTSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Edit the local list and sync it
    Client {
        /// Sync gateway base URL
        #[arg(long, env = "LISTSYNC_SERVER_URL")]
        server_url: Option<String>,

        /// Local state database
        #[arg(long, env = "LISTSYNC_STATE")]
        state: Option<PathBuf>,

        #[command(subcommand)]
        cmd: ClientCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("listsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load or create default config
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Command::Serve {
            http_port,
            database,
            password,
        } => {
            // Apply CLI overrides
            if let Some(port) = http_port {
                config.server.http_port = port;
            }
            if let Some(database) = database {
                config.server.database_path = database;
            }
            if password.is_some() {
                config.auth.password = password;
            }

            info!(
                http_port = config.server.http_port,
                database = %config.server.database_path.display(),
                "Starting listsync gateway"
            );
            listsync::server::serve(&config).await?;
        }

        Command::Client {
            server_url,
            state,
            cmd,
        } => {
            if let Some(url) = server_url {
                config.client.server_url = url;
            }
            if let Some(state) = state {
                config.client.state_path = state;
            }

            match cli::execute_command(&config.client, cmd).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
