//! Command-line argument parsing (`spec.md` §6 "CLI").

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::VERSION;

/// Continuous relational-database-to-search-index change propagation.
#[derive(Parser)]
#[command(name = "indexflow")]
#[command(version = VERSION)]
#[command(about = "Continuous database-to-search-index sync daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a configured sync.
    Sync(SyncArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum SslMode {
    Allow,
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SslMode::Allow => "allow",
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        write!(f, "{s}")
    }
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("mode").args(["daemon", "polling", "analyze"]).multiple(false)
))]
#[command(group(
    ArgGroup::new("role").args(["producer", "consumer"]).multiple(false)
))]
pub struct SyncArgs {
    /// Path to the sync configuration document.
    #[arg(long)]
    pub config: PathBuf,

    /// Run indefinitely, processing notify and replication events as they
    /// arrive.
    #[arg(short, long)]
    pub daemon: bool,

    /// Run `pull()` in a tight loop, sleeping `POLL_INTERVAL` between calls.
    #[arg(long)]
    pub polling: bool,

    /// Run the source-tailer half only.
    #[arg(long)]
    pub producer: bool,

    /// Run the resolver/executor/search half only.
    #[arg(long)]
    pub consumer: bool,

    /// Report missing indexes on foreign-key/primary-key columns and exit.
    #[arg(short, long)]
    pub analyze: bool,

    /// Number of consumer workers in daemon mode.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub num_workers: usize,

    /// Source database host, overriding the value embedded in the sync
    /// document's connection string.
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Source database port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Source database user.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Source database password. Omit to be prompted.
    #[arg(long)]
    pub password: Option<String>,

    /// TLS negotiation mode for the source connection.
    #[arg(long, value_enum, default_value_t = SslMode::Prefer)]
    pub sslmode: SslMode,

    /// Path to a root certificate for `sslmode=verify-ca`/`verify-full`.
    #[arg(long)]
    pub sslrootcert: Option<PathBuf>,

    /// Verbose logging (`debug` level).
    #[arg(short, long)]
    pub verbose: bool,
}

impl SyncArgs {
    /// Prompts on stdin when `--password` was omitted and `PGPASSWORD` isn't
    /// set, mirroring `psql`'s own prompt behavior.
    pub fn resolve_password(&self) -> Option<String> {
        if let Some(password) = &self.password {
            return Some(password.clone());
        }
        if let Ok(env_password) = std::env::var("PGPASSWORD") {
            return Some(env_password);
        }
        None
    }
}
