//! passportier: command-line front end for the vault engine
//!
//! Usage:
//!   passportier [--config ~/.config/passportier/config.toml] shell --user 42
//!   passportier list --user 42
//!   passportier config show
//!
//! Sessions live in the engine process (unless `session.backend = "redis"`),
//! so unlocking only lasts for one `shell` invocation.

mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use passportier_core::config::PassportierConfig;
use passportier_core::{CoreError, UserId};
use passportier_vault::Vault;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "passportier", version, about = "Zero-knowledge secret vault")]
struct Cli {
    /// Path to passportier.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PASSPORTIER_CONFIG",
        default_value = "~/.config/passportier/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "PASSPORTIER_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "PASSPORTIER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive session for one user: unlock, save, get, list, lock
    Shell {
        /// User identifier
        #[arg(long, short = 'u')]
        user: UserId,
    },

    /// List stored service names (no passphrase needed)
    List {
        #[arg(long, short = 'u')]
        user: UserId,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);

    let mut config = load_config(&config_path)?;
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log.format = match format {
            LogFormat::Json => "json".into(),
            LogFormat::Text => "text".into(),
        };
    }
    config.storage.path = expand_tilde(&config.storage.path);

    init_logging(&config.log.level, &config.log.format);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "passportier starting"
    );

    match cli.command {
        Commands::Shell { user } => {
            let vault = Vault::from_config(&config)
                .await
                .context("starting vault engine")?;
            shell::run(&vault, user).await
        }
        Commands::List { user } => {
            let vault = Vault::from_config(&config)
                .await
                .context("starting vault engine")?;
            let records = vault.list(user).await.context("listing credentials")?;
            if records.is_empty() {
                println!("no stored credentials");
            }
            for record in records {
                println!("{}", record.service_name);
            }
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            let rendered = toml::to_string_pretty(&config).context("rendering config")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<PassportierConfig> {
    match PassportierConfig::from_file(path) {
        Ok(config) => Ok(config),
        Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            // Logging is not initialised yet.
            eprintln!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Ok(PassportierConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("loading config {}", path.display())),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so they never mix with shell output on stdout.
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
