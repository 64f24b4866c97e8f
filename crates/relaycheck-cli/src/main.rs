use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "relaycheck",
    about = "relaycheck — reachability checks for proxy endpoints",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every endpoint in a JSON list and write the usable ones.
    Check {
        /// JSON array of endpoint descriptors
        #[arg(short, long)]
        input: PathBuf,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Extra options as `key=value&key=value`, applied over the config file
        #[arg(short, long)]
        args: Option<String>,
        /// Result cache database (used when `cache` is enabled)
        #[arg(long, default_value = "relaycheck.redb")]
        cache_db: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Inspect or clean the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove entries older than the given age
    Prune {
        #[arg(long, default_value = "relaycheck.redb")]
        cache_db: PathBuf,
        /// Maximum age in milliseconds
        #[arg(long)]
        max_age: u64,
    },
    /// Remove every entry
    Clear {
        #[arg(long, default_value = "relaycheck.redb")]
        cache_db: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a relaycheck.toml scaffold with default values
    Init {
        #[arg(short, long, default_value = "relaycheck.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,relaycheck=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            input,
            config,
            args,
            cache_db,
            output,
            format,
        } => {
            let options = commands::check::CheckOptions {
                input,
                config,
                args,
                cache_db,
                output,
                format,
            };
            commands::check::check(options).await
        }
        Commands::Cache { action } => match action {
            CacheAction::Prune { cache_db, max_age } => commands::cache::prune(&cache_db, max_age),
            CacheAction::Clear { cache_db } => commands::cache::clear(&cache_db),
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => commands::config::init(&path, force),
        },
    }
}
