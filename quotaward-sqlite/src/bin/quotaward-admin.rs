// quotaward-admin: operator commands against a quotaward SQLite database.
//
// Database location and quota settings come from the same QUOTAWARD_*
// environment variables the service reads; `--database` overrides the path.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quotaward::{
    AuditStore, QuotaConfig, RateLimiterEngine, RetentionWorker, StoreGuard, UserIdentity,
};
use quotaward_sqlite::SqliteConfig;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Inspect and reset per-user quotas, purge and browse the audit trail.
#[derive(Parser, Debug)]
#[command(name = "quotaward-admin")]
#[command(version)]
#[command(about = "Administer quotaward quotas and audit records", long_about = None)]
struct Args {
    /// SQLite database file (defaults to $QUOTAWARD_DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every user's counter and window
    List,
    /// Zero one user's counter; their next request opens a fresh window
    Reset { user: String },
    /// Zero every user's counter
    ResetAll {
        /// Required to confirm the bulk reset
        #[arg(long)]
        yes: bool,
    },
    /// Remove one user's quota row
    Delete { user: String },
    /// Delete audit records older than the retention horizon
    Purge {
        /// Override $QUOTAWARD_RETENTION_DAYS
        #[arg(long)]
        days: Option<u64>,
    },
    /// Show a user's most recent audit records
    History {
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(level.into()).from_env_lossy())
        .with_writer(std::io::stderr)
        .init();

    let config = QuotaConfig::from_env().context("invalid quota configuration")?;
    let mut sqlite = SqliteConfig::from_env().context("invalid sqlite configuration")?;
    if let Some(path) = args.database {
        sqlite.path = path;
    }
    info!(path = %sqlite.path.display(), "opening database");

    let (quotas, audit) = quotaward_sqlite::open(&sqlite)
        .with_context(|| format!("cannot open {}", sqlite.path.display()))?;
    let audit: Arc<dyn AuditStore> = Arc::new(audit);
    let engine = RateLimiterEngine::from_config(Arc::new(quotas), &config)?;

    match args.command {
        Commands::List => {
            let rows = engine.list().await?;
            let now = engine.clock().now();
            let limit = engine.window_policy().limit();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("no quota records");
            } else {
                for row in rows {
                    println!(
                        "{:<40} {:>4}/{:<4} remaining={:<4} resets {}",
                        row.user_identity,
                        row.request_count,
                        limit,
                        row.remaining_at(now, limit),
                        row.window_reset_at.to_rfc3339()
                    );
                }
            }
        }
        Commands::Reset { user } => {
            let user = UserIdentity::new(user)?;
            let found = engine.reset(&user).await?;
            report(args.json, json!({ "user": user, "reset": found }), || {
                if found {
                    format!("quota reset for '{}'", user)
                } else {
                    format!("no quota record for '{}'", user)
                }
            });
        }
        Commands::ResetAll { yes } => {
            if !yes {
                bail!("refusing to reset every user without --yes");
            }
            let count = engine.reset_all().await?;
            report(args.json, json!({ "reset": count }), || format!("quota reset for {} users", count));
        }
        Commands::Delete { user } => {
            let user = UserIdentity::new(user)?;
            let found = engine.delete(&user).await?;
            report(args.json, json!({ "user": user, "deleted": found }), || {
                if found {
                    format!("quota record deleted for '{}'", user)
                } else {
                    format!("no quota record for '{}'", user)
                }
            });
        }
        Commands::Purge { days } => {
            let horizon = match days {
                Some(days) => Duration::from_secs(days.saturating_mul(24 * 3600)),
                None => config.retention(),
            };
            let worker = RetentionWorker::new(
                audit,
                StoreGuard::new(config.store_timeout())?,
                horizon,
                config.purge_interval(),
            )?;
            let deleted = worker.purge_older_than(horizon).await?;
            report(args.json, json!({ "deleted": deleted }), || format!("deleted {} audit records", deleted));
        }
        Commands::History { user, limit } => {
            let user = UserIdentity::new(user)?;
            let records = audit.list_for_user(&user, limit).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in records {
                    let entry = &record.entry;
                    println!(
                        "#{:<6} {} {:<20} {:<5} {:>6}ms {}",
                        record.id,
                        entry.timestamp.to_rfc3339(),
                        entry.endpoint_name,
                        if entry.success { "ok" } else { "error" },
                        entry.processing_time_ms,
                        entry.error_message.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}

fn report(json: bool, value: serde_json::Value, text: impl FnOnce() -> String) {
    if json {
        println!("{}", value);
    } else {
        println!("{}", text());
    }
}
