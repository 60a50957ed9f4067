//! SQLite-backed usage ledger, call log, and query history.
//!
//! The quota check-and-increment is a single conditional `UPDATE`, so
//! SQLite's write serialization makes admission linearizable per user:
//! two concurrent questions can never both take the last free slot. The
//! critical section is exactly that statement, never a provider call.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use askbase_core::models::{
    Admission, AnswerStyle, CallLogEntry, ContentFilter, QueryResult, UserProfile,
};
use askbase_core::store::{CallSink, HistorySink, UsageLedger};

/// SQLite implementation of [`UsageLedger`], plus the user-management
/// operations the CLI needs.
pub struct SqliteLedger {
    pool: SqlitePool,
    free_limit: i64,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool, free_limit: i64) -> Self {
        Self { pool, free_limit }
    }

    /// Register a user with default preferences. Idempotent.
    pub async fn create_user(&self, user_id: &str, search_limit: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, search_limit, created_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(search_limit as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a user's profile (identity plus answer preferences).
    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile> {
        let row = sqlx::query("SELECT style, content_filter, search_limit FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(r) => r,
            None => bail!("unknown user: {}", user_id),
        };

        let style_str: String = row.get("style");
        let filter_str: String = row.get("content_filter");
        let style = match AnswerStyle::parse(&style_str) {
            Some(s) => s,
            None => bail!("unknown answer style in database: {}", style_str),
        };
        let filter = match ContentFilter::parse(&filter_str) {
            Some(f) => f,
            None => bail!("unknown content filter in database: {}", filter_str),
        };

        Ok(UserProfile {
            id: user_id.to_string(),
            style,
            filter,
            search_limit: row.get::<i64, _>("search_limit") as usize,
        })
    }

    pub async fn set_style(&self, user_id: &str, style: AnswerStyle) -> Result<()> {
        self.update_user(user_id, "style", style.as_str()).await
    }

    pub async fn set_filter(&self, user_id: &str, filter: ContentFilter) -> Result<()> {
        self.update_user(user_id, "content_filter", filter.as_str())
            .await
    }

    pub async fn set_search_limit(&self, user_id: &str, limit: usize) -> Result<()> {
        let result = sqlx::query("UPDATE users SET search_limit = ? WHERE id = ?")
            .bind(limit as i64)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("unknown user: {}", user_id);
        }
        Ok(())
    }

    /// Grant (or extend) a subscription window of `days` from now, or
    /// from the current window's end when one is still active.
    pub async fn grant_subscription(&self, user_id: &str, days: i64) -> Result<i64> {
        let now = Utc::now().timestamp();
        let row = sqlx::query("SELECT subscription_end FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let current_end: Option<i64> = match row {
            Some(r) => r.get("subscription_end"),
            None => bail!("unknown user: {}", user_id),
        };

        let base = current_end.filter(|end| *end > now).unwrap_or(now);
        let new_end = base + days * 86_400;

        sqlx::query(
            r#"
            UPDATE users
            SET subscription_start = COALESCE(subscription_start, ?),
                subscription_end = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(new_end)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(new_end)
    }

    /// Current usage for display: (free used, free limit, active
    /// subscription end).
    pub async fn usage(&self, user_id: &str) -> Result<(i64, i64, Option<i64>)> {
        let row =
            sqlx::query("SELECT free_requests_used, subscription_end FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let row = match row {
            Some(r) => r,
            None => bail!("unknown user: {}", user_id),
        };
        let used: i64 = row.get("free_requests_used");
        let sub_end: Option<i64> = row.get("subscription_end");
        let now = Utc::now().timestamp();
        Ok((used, self.free_limit, sub_end.filter(|end| *end > now)))
    }

    async fn update_user(&self, user_id: &str, column: &str, value: &str) -> Result<()> {
        // Column names are fixed by the callers above, never user input.
        let sql = format!("UPDATE users SET {} = ? WHERE id = ?", column);
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("unknown user: {}", user_id);
        }
        Ok(())
    }
}

#[async_trait]
impl UsageLedger for SqliteLedger {
    async fn admit(&self, user_id: &str) -> Result<Admission> {
        let now = Utc::now().timestamp();

        let row =
            sqlx::query("SELECT free_requests_used, subscription_end FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let row = match row {
            Some(r) => r,
            None => bail!("unknown user: {}", user_id),
        };

        let sub_end: Option<i64> = row.get("subscription_end");
        match sub_end {
            Some(end) if now < end => return Ok(Admission::subscription()),
            Some(_) => {
                // Lazy expiry: flip the window inactive on first read
                // past its end.
                sqlx::query(
                    "UPDATE users SET subscription_start = NULL, subscription_end = NULL WHERE id = ?",
                )
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            }
            None => {}
        }

        // Check-and-increment in one statement. rows_affected = 0 means
        // another writer took the last slot first (or none remained).
        let result = sqlx::query(
            r#"
            UPDATE users SET free_requests_used = free_requests_used + 1
            WHERE id = ? AND free_requests_used < ?
            "#,
        )
        .bind(user_id)
        .bind(self.free_limit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(Admission::rejected());
        }

        let used: i64 = sqlx::query_scalar("SELECT free_requests_used FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Admission::free((self.free_limit - used).max(0)))
    }

    async fn release(&self, user_id: &str, admission: &Admission) -> Result<()> {
        if admission.via_subscription {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE users SET free_requests_used = MAX(free_requests_used - 1, 0)
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit(&self, _user_id: &str, _admission: &Admission) -> Result<()> {
        // Increment-at-admit: nothing left to change on success.
        Ok(())
    }
}

/// SQLite implementation of the append-only [`CallSink`].
pub struct SqliteCallLog {
    pool: SqlitePool,
}

impl SqliteCallLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Recent call-log entries for display, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<CallLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, model, correlation_id, input_chars, output_chars,
                   prompt_tokens, completion_tokens, total_tokens,
                   latency_ms, cost_usd, success, error, created_at
            FROM call_log
            ORDER BY created_at DESC, id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("kind");
            let kind = match askbase_core::models::CallKind::parse(&kind_str) {
                Some(k) => k,
                None => bail!("unknown call kind in database: {}", kind_str),
            };
            let created_ts: i64 = row.get("created_at");
            entries.push(CallLogEntry {
                id: row.get("id"),
                kind,
                model: row.get("model"),
                correlation_id: row.get("correlation_id"),
                input_chars: row.get("input_chars"),
                output_chars: row.get("output_chars"),
                usage: askbase_core::models::TokenUsage {
                    prompt: row.get("prompt_tokens"),
                    completion: row.get("completion_tokens"),
                    total: row.get("total_tokens"),
                },
                latency_ms: row.get("latency_ms"),
                cost_usd: row.get("cost_usd"),
                success: row.get::<i64, _>("success") != 0,
                error: row.get("error"),
                created_at: chrono::DateTime::from_timestamp(created_ts, 0)
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl CallSink for SqliteCallLog {
    async fn append(&self, entry: &CallLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_log (id, kind, model, correlation_id, input_chars, output_chars,
                                  prompt_tokens, completion_tokens, total_tokens,
                                  latency_ms, cost_usd, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.kind.as_str())
        .bind(&entry.model)
        .bind(&entry.correlation_id)
        .bind(entry.input_chars)
        .bind(entry.output_chars)
        .bind(entry.usage.prompt)
        .bind(entry.usage.completion)
        .bind(entry.usage.total)
        .bind(entry.latency_ms)
        .bind(entry.cost_usd)
        .bind(entry.success as i64)
        .bind(&entry.error)
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// SQLite implementation of the write-only [`HistorySink`].
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Recent history rows for display, newest first:
    /// (question, answer, outcome, created_at).
    pub async fn recent(&self, user_id: &str, limit: i64) -> Result<Vec<(String, String, String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT question, answer, outcome, created_at
            FROM query_history
            WHERE user_id = ?
            ORDER BY created_at DESC, id
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("question"),
                    row.get("answer"),
                    row.get("outcome"),
                    row.get("created_at"),
                )
            })
            .collect())
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn record(&self, user_id: &str, result: &QueryResult, outcome: &str) -> Result<()> {
        let citations_json = serde_json::to_string(&result.citations)?;
        sqlx::query(
            r#"
            INSERT INTO query_history (id, user_id, question, answer, citations_json,
                                       style, outcome, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(&result.question)
        .bind(&result.answer)
        .bind(citations_json)
        .bind(result.style.as_str())
        .bind(outcome)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
