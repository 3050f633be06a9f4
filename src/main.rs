//! indexflow — continuous relational-database-to-search-index change
//! propagation.
//!
//! Wires the CLI, config loading, and logging ambient stack around the
//! `orchestrator::Sync` that owns every core component (C1–C8).

mod checkpoint;
mod cli;
mod config;
mod error;
mod executor;
mod logging;
mod name;
mod orchestrator;
mod payload;
mod queue;
mod registry;
mod resolver;
mod search;
mod tailer;
mod tree;
mod util;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, SyncArgs};
use orchestrator::{Sync, Timer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Commands::Sync(args) = cli.command;

    logging::init(args.verbose);
    let _timer = Timer::new("indexflow");

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: SyncArgs) -> Result<()> {
    let settings = config::Settings::from_env().context("loading process settings")?;
    let docs = config::load_docs(&args.config)
        .with_context(|| format!("loading sync config '{}'", args.config.display()))?;

    if args.producer && args.consumer {
        bail!("--producer and --consumer are mutually exclusive");
    }
    let (producer, consumer) = match (args.producer, args.consumer) {
        (true, false) => (true, false),
        (false, true) => (false, true),
        _ => (true, true),
    };

    for doc in docs {
        let database_url = build_database_url(&doc.database, &args);
        let sync = Sync::new(doc, settings.clone(), database_url)
            .await
            .context("constructing sync instance")?;
        let sync = sync.with_producer_consumer(producer, consumer);

        sync.validate().await.context("startup validation failed")?;

        if args.analyze {
            let report = sync.analyze().await.context("analyze failed")?;
            if report.is_empty() {
                println!("-- {}: all foreign-key/primary-key columns are indexed", sync.name());
            } else {
                print!("{report}");
            }
            continue;
        }

        let sync = Arc::new(sync);
        if args.daemon {
            sync.run_daemon(args.num_workers).await?;
        } else if args.polling {
            sync.run_polling().await?;
        } else {
            sync.pull().await.context("pull failed")?;
        }
    }

    Ok(())
}

/// Assembles a `postgres://` connection string from the CLI's connection
/// flags and the sync document's database name (`spec.md` §6 CLI flags
/// `--host`/`--port`/`--user`/`--password`/`--sslmode`).
fn build_database_url(database: &str, args: &SyncArgs) -> String {
    let user = args.user.as_deref().unwrap_or("postgres");
    let host = args.host.as_deref().unwrap_or("localhost");
    let port = args.port.unwrap_or(5432);
    let sslmode = args.sslmode;

    let mut url = match args.resolve_password() {
        Some(password) => format!("postgres://{user}:{password}@{host}:{port}/{database}"),
        None => format!("postgres://{user}@{host}:{port}/{database}"),
    };
    url.push_str(&format!("?sslmode={sslmode}"));
    if let Some(root_cert) = &args.sslrootcert {
        url.push_str(&format!("&sslrootcert={}", root_cert.display()));
    }
    url
}
