//! profile-sync - sign in with GitHub and keep the profile row in sync.

mod app;
mod callback_server;
mod commands;
mod output;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;

use app::App;
use clap::{Parser, Subcommand};
use profile_config::{init_logging, Config, Paths};
use tracing::debug;

/// profile-sync command-line interface.
#[derive(Parser)]
#[command(name = "profile-sync")]
#[command(about = "GitHub sign-in and profile dashboard for a Supabase project")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, session and logs. Defaults to ~/.profile-sync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Also log to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign in with GitHub in the browser
    Login {
        /// Port for the local callback server (defaults to the site URL port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Complete sign-in from a redirect URL copied from the browser
    Callback {
        /// The full /auth/callback URL
        url: String,
    },
    /// Show authentication status
    Status,
    /// Show the stored GitHub profile
    Dashboard,
    /// Sign out and clear the local session
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, &paths, cli.verbose);
    debug!(command = ?cli.command, "Starting profile-sync");

    // Read-only commands never write the profile row
    let reconcile_on_load = !matches!(cli.command, Commands::Status | Commands::Logout);
    let app = App::build(config, paths, reconcile_on_load)?;

    let result = match cli.command {
        Commands::Login { port } => commands::login(&app, port, &cli.format).await,
        Commands::Callback { url } => commands::callback(&app, &url, &cli.format).await,
        Commands::Status => commands::status(&app, &cli.format).await,
        Commands::Dashboard => commands::dashboard(&app, &cli.format).await,
        Commands::Logout => commands::logout(&app, &cli.format).await,
    };

    app.shutdown().await;
    result
}
