//! `postwatch`: forum mail diagnostics.
//!
//! # Usage
//!
//! ```
//! postwatch import snapshot.json
//! postwatch post --pid 101
//! postwatch post --pid 101 --uid 7 --json
//! postwatch post --pid 101 --snapshot snapshot.json --force
//! postwatch email --subject "Relay check" --dry-run
//! ```
//!
//! Settings are read from `postwatch.toml` (or `--config`) and `POSTWATCH_*`
//! environment variables. Logs go to stderr; reports go to stdout.

mod email;
mod post;
mod report;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use postwatch_core::snapshot::Snapshot;
use postwatch_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{email::EmailArgs, post::PostArgs, settings::Settings};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "postwatch", author, version, about = "Forum mail diagnostics")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "postwatch.toml")]
  config: PathBuf,

  /// SQLite database to use instead of `store_path` from the config.
  #[arg(long, env = "POSTWATCH_DB", value_name = "PATH")]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Explain which users the next mail run would notify about a post.
  Post(PostArgs),
  /// Send a test message through the outbox.
  Email(EmailArgs),
  /// Load a JSON snapshot of forum data into the database.
  Import {
    /// Snapshot document to read.
    snapshot: PathBuf,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;
  if let Some(db) = cli.db {
    settings.store_path = db;
  }

  // One clock reading per invocation.
  let now = Utc::now();

  match cli.command {
    Command::Post(args) => {
      let report = match &args.snapshot {
        Some(path) => {
          let snapshot = read_snapshot(path)?;
          post::run(&snapshot, &args, &settings, now).await?
        }
        None => {
          let store = open_store(&settings).await?;
          post::run(&store, &args, &settings, now).await?
        }
      };
      if args.json {
        println!("{}", report.to_json().context("failed to serialise report")?);
      } else {
        print!("{}", report.to_text());
      }
    }

    Command::Email(args) => {
      let line = if args.dry_run {
        // A dry run never touches the database.
        email::dry_run_line(&email::compose(&args, &settings, now)?)
      } else {
        let store = open_store(&settings).await?;
        email::run(&store, &args, &settings, now).await?
      };
      println!("{line}");
    }

    Command::Import { snapshot } => {
      let document = read_snapshot(&snapshot)?;
      let store = open_store(&settings).await?;
      let summary = store
        .import_snapshot(&document)
        .await
        .context("failed to import snapshot")?;
      println!(
        "Imported {} posts, {} discussions, {} users into {}",
        summary.posts,
        summary.discussions,
        summary.users,
        settings.store_path.display()
      );
    }
  }

  Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
  let path = &settings.store_path;
  SqliteStore::open(path)
    .await
    .with_context(|| format!("failed to open store at {}", path.display()))
}

fn read_snapshot(path: &std::path::Path) -> anyhow::Result<Snapshot> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading snapshot {}", path.display()))?;
  Snapshot::from_json(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
}
