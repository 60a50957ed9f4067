//! # askbase CLI
//!
//! The `askbase` binary is the primary interface for askbase. It provides
//! commands for database initialization, user and quota management,
//! content indexing, asking questions, and inspecting telemetry.
//!
//! ## Usage
//!
//! ```bash
//! askbase --config ./config/askbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askbase init` | Create the SQLite database and run schema migrations |
//! | `askbase user add <id>` | Register a user |
//! | `askbase user show <id>` | Show a user's preferences and usage |
//! | `askbase user style <id> <style>` | Set answer style (concise, detailed, step-by-step) |
//! | `askbase user filter <id> <filter>` | Set content filter (all, documents, videos, favorites) |
//! | `askbase user limit <id> <n>` | Set fragments per retrieval |
//! | `askbase user subscribe <id>` | Grant a subscription window |
//! | `askbase index <user> <source-id> <file>` | Index a text file as a source |
//! | `askbase ask <user> "<question>"` | Ask a question over the user's library |
//! | `askbase sources <user>` | List a user's sources |
//! | `askbase sources <user> --favorite <id>` | Mark a source as favorite |
//! | `askbase sources <user> --delete <id>` | Delete a source and its fragments |
//! | `askbase calls` | Show recent external-model calls with cost |
//! | `askbase history <user>` | Show a user's recent questions |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! askbase init --config ./config/askbase.toml
//!
//! # Register a user and index a document
//! askbase user add alice
//! askbase index alice onboarding-notes ./docs/onboarding.md
//!
//! # Index a video transcript
//! askbase index alice intro-call ./transcripts/intro.txt --kind video
//!
//! # Ask a question
//! askbase ask alice "what does the onboarding call cover?"
//!
//! # Inspect model spend
//! askbase calls --limit 20
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askbase::config::{self, Config};
use askbase::db;
use askbase::migrate;
use askbase::openai::{OpenAiEmbedder, OpenAiGenerator};
use askbase::sqlite_ledger::{SqliteCallLog, SqliteHistory, SqliteLedger};
use askbase::sqlite_store::SqliteStore;
use askbase_core::index::{index_source, IndexParams};
use askbase_core::models::{AnswerStyle, ContentFilter, QueryOutcome, SourceKind, SourceMeta};
use askbase_core::pipeline::{PipelineParams, QueryPipeline};
use askbase_core::telemetry::CallLedger;

/// askbase — ask questions over your own document and video library.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askbase.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askbase",
    about = "askbase — retrieval-augmented questions over your own content library",
    version,
    long_about = "askbase indexes your documents and video transcripts into overlapping \
    fragments with embeddings, retrieves the most similar fragments for each question, \
    and synthesizes a grounded, cited answer. Free-tier and subscription usage gating \
    is enforced per user, and every external-model call is logged with token counts, \
    latency, and cost."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (users,
    /// sources, fragments, call_log, query_history). Idempotent.
    Init,

    /// Manage users, preferences, and subscriptions.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Index a text file as a source for a user.
    ///
    /// Splits the file into overlapping fragments, embeds each one, and
    /// replaces the source's fragment set atomically. Re-running on the
    /// same source id replaces the previous index.
    Index {
        /// User id owning the source.
        user: String,

        /// Stable source identifier (re-indexing the same id replaces it).
        source_id: String,

        /// Path to the extracted text (document body or video transcript).
        file: PathBuf,

        /// Source kind: `document` or `video`.
        #[arg(long, default_value = "document")]
        kind: String,
    },

    /// Ask a question over a user's indexed content.
    ///
    /// Runs the full pipeline: quota admission, query embedding,
    /// retrieval, context assembly, and answer synthesis. Prints the
    /// answer with its citations, or the quota / insufficient-context
    /// notice.
    Ask {
        /// User id asking the question.
        user: String,

        /// The question text.
        question: String,
    },

    /// List or modify a user's sources.
    Sources {
        /// User id owning the sources.
        user: String,

        /// Mark this source id as a favorite.
        #[arg(long, conflicts_with_all = ["unfavorite", "delete"])]
        favorite: Option<String>,

        /// Clear the favorite flag on this source id.
        #[arg(long, conflicts_with = "delete")]
        unfavorite: Option<String>,

        /// Delete this source id and all its fragments.
        #[arg(long)]
        delete: Option<String>,
    },

    /// Show recent external-model calls with token counts and cost.
    Calls {
        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show a user's recent questions and outcomes.
    History {
        /// User id.
        user: String,

        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

/// User management subcommands.
#[derive(Subcommand)]
enum UserAction {
    /// Register a user with default preferences. Idempotent.
    Add {
        /// User id.
        id: String,
    },

    /// Show a user's preferences, free-tier usage, and subscription.
    Show {
        /// User id.
        id: String,
    },

    /// Set the answer style: `concise`, `detailed`, or `step-by-step`.
    Style {
        /// User id.
        id: String,
        /// The style name.
        style: String,
    },

    /// Set the content filter: `all`, `documents`, `videos`, or `favorites`.
    Filter {
        /// User id.
        id: String,
        /// The filter name.
        filter: String,
    },

    /// Set the maximum fragments per retrieval.
    Limit {
        /// User id.
        id: String,
        /// Fragment limit (the product UI offers 3, 5, or 10).
        limit: usize,
    },

    /// Grant (or extend) a subscription window.
    Subscribe {
        /// User id.
        id: String,
        /// Window length in days; defaults to `quota.subscription_days`.
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg.db.path).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }

        Commands::User { action } => {
            let ledger = SqliteLedger::new(pool.clone(), cfg.quota.free_limit);
            match action {
                UserAction::Add { id } => {
                    ledger.create_user(&id, cfg.retrieval.search_limit).await?;
                    println!("User '{}' registered.", id);
                }
                UserAction::Show { id } => {
                    let profile = ledger.get_profile(&id).await?;
                    let (used, limit, sub_end) = ledger.usage(&id).await?;
                    println!("User:          {}", profile.id);
                    println!("Style:         {}", profile.style.as_str());
                    println!("Filter:        {}", profile.filter.as_str());
                    println!("Search limit:  {}", profile.search_limit);
                    println!("Free usage:    {}/{}", used, limit);
                    match sub_end {
                        Some(end) => println!("Subscription:  active until {}", format_ts(end)),
                        None => println!("Subscription:  none"),
                    }
                }
                UserAction::Style { id, style } => {
                    let style = match AnswerStyle::parse(&style) {
                        Some(s) => s,
                        None => bail!(
                            "unknown style '{}'; must be concise, detailed, or step-by-step",
                            style
                        ),
                    };
                    ledger.set_style(&id, style).await?;
                    println!("Style for '{}' set to {}.", id, style.as_str());
                }
                UserAction::Filter { id, filter } => {
                    let filter = match ContentFilter::parse(&filter) {
                        Some(f) => f,
                        None => bail!(
                            "unknown filter '{}'; must be all, documents, videos, or favorites",
                            filter
                        ),
                    };
                    ledger.set_filter(&id, filter).await?;
                    println!("Filter for '{}' set to {}.", id, filter.as_str());
                }
                UserAction::Limit { id, limit } => {
                    if limit == 0 {
                        bail!("limit must be >= 1");
                    }
                    ledger.set_search_limit(&id, limit).await?;
                    println!("Search limit for '{}' set to {}.", id, limit);
                }
                UserAction::Subscribe { id, days } => {
                    let days = days.unwrap_or(cfg.quota.subscription_days);
                    if days < 1 {
                        bail!("days must be >= 1");
                    }
                    let end = ledger.grant_subscription(&id, days).await?;
                    println!("Subscription for '{}' active until {}.", id, format_ts(end));
                }
            }
        }

        Commands::Index {
            user,
            source_id,
            file,
            kind,
        } => {
            let kind = match SourceKind::parse(&kind) {
                Some(k) => k,
                None => bail!("unknown kind '{}'; must be document or video", kind),
            };
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let store = SqliteStore::new(pool.clone());
            let calls = CallLedger::new(Arc::new(SqliteCallLog::new(pool.clone())));
            let embedder = OpenAiEmbedder::new(&cfg.embedding)?;

            let meta = SourceMeta {
                source_id,
                kind,
                favorite: false,
                created_at: Utc::now().timestamp(),
            };
            let params = IndexParams {
                fragment_tokens: cfg.fragmenting.fragment_tokens,
                overlap_tokens: cfg.fragmenting.overlap_tokens,
            };
            let count = index_source(&store, &embedder, &calls, &user, &meta, &text, &params)
                .await
                .map_err(anyhow::Error::from)?;
            println!(
                "Indexed '{}' for '{}': {} fragments.",
                meta.source_id, user, count
            );
        }

        Commands::Ask { user, question } => {
            let pipeline = build_pipeline(&cfg, &pool)?;
            let ledger = SqliteLedger::new(pool.clone(), cfg.quota.free_limit);
            let profile = ledger.get_profile(&user).await?;

            match pipeline.ask(&profile, &question).await? {
                QueryOutcome::Answered(result) => {
                    println!("{}\n", result.answer);
                    if !result.citations.is_empty() {
                        println!("Sources:");
                        for c in &result.citations {
                            let marker = if c.truncated { " (truncated)" } else { "" };
                            println!(
                                "  [{}#{}] {} (similarity {:.2}){}",
                                c.source_id,
                                c.ordinal,
                                c.kind.as_str(),
                                c.similarity,
                                marker
                            );
                        }
                    }
                }
                QueryOutcome::QuotaExceeded => {
                    println!(
                        "Free question limit reached. Subscribe to continue: \
                         askbase user subscribe {}",
                        user
                    );
                }
                QueryOutcome::InsufficientContext => {
                    println!(
                        "Your indexed content does not cover this question. \
                         Try indexing more sources or loosening the content filter."
                    );
                }
            }
        }

        Commands::Sources {
            user,
            favorite,
            unfavorite,
            delete,
        } => {
            use askbase_core::store::FragmentStore;
            let store = SqliteStore::new(pool.clone());

            if let Some(source_id) = favorite {
                store.set_favorite(&user, &source_id, true).await?;
                println!("Source '{}' marked as favorite.", source_id);
            } else if let Some(source_id) = unfavorite {
                store.set_favorite(&user, &source_id, false).await?;
                println!("Favorite cleared on '{}'.", source_id);
            } else if let Some(source_id) = delete {
                store.delete_source(&user, &source_id).await?;
                println!("Source '{}' deleted.", source_id);
            } else {
                let sources = store.list_sources(&user).await?;
                if sources.is_empty() {
                    println!("No sources indexed for '{}'.", user);
                }
                for (meta, fragment_count) in sources {
                    let star = if meta.favorite { "*" } else { " " };
                    println!(
                        "{} {:<30} {:<9} {:>5} fragments  {}",
                        star,
                        meta.source_id,
                        meta.kind.as_str(),
                        fragment_count,
                        format_ts(meta.created_at)
                    );
                }
            }
        }

        Commands::Calls { limit } => {
            let log = SqliteCallLog::new(pool.clone());
            let entries = log.recent(limit).await?;
            if entries.is_empty() {
                println!("No calls logged yet.");
            }
            for e in entries {
                let status = if e.success { "ok" } else { "FAILED" };
                let cost = e
                    .cost_usd
                    .map(|c| format!("${:.6}", c))
                    .unwrap_or_else(|| "-".to_string());
                let tokens = e
                    .usage
                    .total
                    .or_else(|| match (e.usage.prompt, e.usage.completion) {
                        (Some(p), Some(c)) => Some(p + c),
                        (p, c) => p.or(c),
                    })
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<13} {:<24} {:>6} tok  {:>6} ms  {:>10}  {}",
                    e.created_at.format("%Y-%m-%d %H:%M:%S"),
                    e.kind.as_str(),
                    e.model,
                    tokens,
                    e.latency_ms,
                    cost,
                    status
                );
                if let Some(err) = e.error {
                    println!("    error: {}", err);
                }
            }
        }

        Commands::History { user, limit } => {
            let history = SqliteHistory::new(pool.clone());
            let rows = history.recent(&user, limit).await?;
            if rows.is_empty() {
                println!("No questions recorded for '{}'.", user);
            }
            for (question, answer, outcome, created_at) in rows {
                println!("{}  [{}]", format_ts(created_at), outcome);
                println!("  Q: {}", question);
                if !answer.is_empty() {
                    println!("  A: {}", answer);
                }
            }
        }
    }

    Ok(())
}

/// Wire the SQLite backends and OpenAI providers into a query pipeline.
fn build_pipeline(cfg: &Config, pool: &sqlx::SqlitePool) -> Result<QueryPipeline> {
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let ledger = Arc::new(SqliteLedger::new(pool.clone(), cfg.quota.free_limit));
    let calls = CallLedger::new(Arc::new(SqliteCallLog::new(pool.clone())));
    let history = Arc::new(SqliteHistory::new(pool.clone()));
    let embedder = Arc::new(OpenAiEmbedder::new(&cfg.embedding)?);
    let generator = Arc::new(OpenAiGenerator::new(&cfg.generation)?);

    let params = PipelineParams {
        similarity_threshold: cfg.retrieval.similarity_threshold,
        token_budget: cfg.context.token_budget,
    };

    Ok(
        QueryPipeline::new(store, ledger, calls, embedder, generator, params)
            .with_history(history),
    )
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
