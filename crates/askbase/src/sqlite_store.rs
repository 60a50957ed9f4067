//! SQLite-backed [`FragmentStore`] implementation.
//!
//! One source's fragment set is always replaced inside a single
//! transaction (upsert source row, delete old fragments, insert new), so
//! a concurrent query sees the old set or the new set, never a mix.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use askbase_core::models::{ContentFilter, Fragment, FragmentHit, SourceKind, SourceMeta};
use askbase_core::store::FragmentStore;
use askbase_core::vector::{blob_to_vec, vec_to_blob};

/// SQLite implementation of the [`FragmentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// List a user's sources for display (id, kind, favorite, created_at,
    /// fragment count).
    pub async fn list_sources(&self, user_id: &str) -> Result<Vec<(SourceMeta, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT s.source_id, s.kind, s.favorite, s.created_at,
                   COUNT(f.id) AS fragment_count
            FROM sources s
            LEFT JOIN fragments f
                ON f.user_id = s.user_id AND f.source_id = s.source_id
            WHERE s.user_id = ?
            GROUP BY s.source_id
            ORDER BY s.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("kind");
            let kind = match SourceKind::parse(&kind_str) {
                Some(k) => k,
                None => bail!("unknown source kind in database: {}", kind_str),
            };
            out.push((
                SourceMeta {
                    source_id: row.get("source_id"),
                    kind,
                    favorite: row.get::<i64, _>("favorite") != 0,
                    created_at: row.get("created_at"),
                },
                row.get("fragment_count"),
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl FragmentStore for SqliteStore {
    async fn replace_source(
        &self,
        user_id: &str,
        meta: &SourceMeta,
        fragments: &[Fragment],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if fragments.len() != vectors.len() {
            bail!(
                "fragment/vector length mismatch: {} vs {}",
                fragments.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sources (user_id, source_id, kind, favorite, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, source_id) DO UPDATE SET
                kind = excluded.kind,
                created_at = excluded.created_at
            "#,
        )
        .bind(user_id)
        .bind(&meta.source_id)
        .bind(meta.kind.as_str())
        .bind(meta.favorite as i64)
        .bind(meta.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM fragments WHERE user_id = ? AND source_id = ?")
            .bind(user_id)
            .bind(&meta.source_id)
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();
        for (fragment, vector) in fragments.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO fragments (id, user_id, source_id, ordinal, text, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&fragment.id)
            .bind(&fragment.user_id)
            .bind(&fragment.source_id)
            .bind(fragment.ordinal)
            .bind(&fragment.text)
            .bind(&fragment.hash)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, user_id: &str, source_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fragments WHERE user_id = ? AND source_id = ?")
            .bind(user_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sources WHERE user_id = ? AND source_id = ?")
            .bind(user_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_favorite(&self, user_id: &str, source_id: &str, favorite: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE sources SET favorite = ? WHERE user_id = ? AND source_id = ?")
                .bind(favorite as i64)
                .bind(user_id)
                .bind(source_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            bail!("unknown source: {}", source_id);
        }
        Ok(())
    }

    async fn scan_fragments(
        &self,
        user_id: &str,
        filter: ContentFilter,
    ) -> Result<Vec<FragmentHit>> {
        // The filter maps onto the sources join; fragment rows carry no
        // kind or favorite of their own.
        let mut sql = String::from(
            r#"
            SELECT f.id, f.user_id, f.source_id, f.ordinal, f.text, f.hash, f.embedding,
                   s.kind, s.favorite, s.created_at
            FROM fragments f
            JOIN sources s
                ON s.user_id = f.user_id AND s.source_id = f.source_id
            WHERE f.user_id = ?
            "#,
        );
        match filter {
            ContentFilter::All => {}
            ContentFilter::Documents => sql.push_str(" AND s.kind = 'document'"),
            ContentFilter::Videos => sql.push_str(" AND s.kind = 'video'"),
            ContentFilter::Favorites => sql.push_str(" AND s.favorite = 1"),
        }

        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("kind");
            let kind = match SourceKind::parse(&kind_str) {
                Some(k) => k,
                None => bail!("unknown source kind in database: {}", kind_str),
            };
            let blob: Vec<u8> = row.get("embedding");
            hits.push(FragmentHit {
                fragment: Fragment {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    source_id: row.get("source_id"),
                    ordinal: row.get("ordinal"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                },
                vector: blob_to_vec(&blob),
                kind,
                favorite: row.get::<i64, _>("favorite") != 0,
                source_created_at: row.get("created_at"),
            });
        }
        Ok(hits)
    }
}
