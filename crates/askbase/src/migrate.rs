//! Database schema creation.
//!
//! All statements are idempotent (`CREATE ... IF NOT EXISTS`), so
//! running the migration repeatedly is safe and is how `askbase init`
//! upgrades an existing database in place.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Users: identity, answer preferences, and the usage counters the
    // ledger updates atomically.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            style TEXT NOT NULL DEFAULT 'detailed',
            content_filter TEXT NOT NULL DEFAULT 'all',
            search_limit INTEGER NOT NULL DEFAULT 5,
            free_requests_used INTEGER NOT NULL DEFAULT 0,
            subscription_start INTEGER,
            subscription_end INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sources: one row per registered document or video transcript.
    // The favorite flag lives here and is joined onto fragments at
    // query time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            user_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            favorite INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, source_id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fragments: the unit of retrieval, with the embedding stored as a
    // little-endian f32 BLOB alongside the text.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(user_id, source_id, ordinal),
            FOREIGN KEY (user_id, source_id) REFERENCES sources(user_id, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Call log: append-only record of every external-model invocation,
    // success and failure alike. Never mutated, never joined to the
    // user lifecycle.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_log (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            model TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            input_chars INTEGER NOT NULL,
            output_chars INTEGER NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            latency_ms INTEGER NOT NULL,
            cost_usd REAL,
            success INTEGER NOT NULL,
            error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Query history: one row per answered (or context-starved) question.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            citations_json TEXT NOT NULL DEFAULT '[]',
            style TEXT NOT NULL,
            outcome TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_user ON fragments(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_log_correlation ON call_log(correlation_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_user ON query_history(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
