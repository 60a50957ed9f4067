//! In-memory implementations of the storage traits, for tests.
//!
//! Everything lives behind `std::sync` locks so the pipeline's
//! concurrency properties (quota linearizability in particular) hold
//! exactly as they do against the SQLite backends.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    Admission, CallLogEntry, ContentFilter, Fragment, FragmentHit, QueryResult, SourceMeta,
};

use super::{CallSink, FragmentStore, HistorySink, UsageLedger};

struct StoredSource {
    meta: SourceMeta,
    fragments: Vec<(Fragment, Vec<f32>)>,
}

/// In-memory [`FragmentStore`].
#[derive(Default)]
pub struct MemoryStore {
    // (user_id, source_id) -> source + fragments
    sources: RwLock<HashMap<(String, String), StoredSource>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment_count(&self, user_id: &str, source_id: &str) -> usize {
        self.sources
            .read()
            .unwrap()
            .get(&(user_id.to_string(), source_id.to_string()))
            .map(|s| s.fragments.len())
            .unwrap_or(0)
    }

    /// Fragment texts for one source, ordered by ordinal.
    pub fn fragment_texts(&self, user_id: &str, source_id: &str) -> Vec<String> {
        self.sources
            .read()
            .unwrap()
            .get(&(user_id.to_string(), source_id.to_string()))
            .map(|s| s.fragments.iter().map(|(f, _)| f.text.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FragmentStore for MemoryStore {
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
        let mut sources = self.sources.write().unwrap();
        sources.insert(
            (user_id.to_string(), meta.source_id.clone()),
            StoredSource {
                meta: meta.clone(),
                fragments: fragments
                    .iter()
                    .cloned()
                    .zip(vectors.iter().cloned())
                    .collect(),
            },
        );
        Ok(())
    }

    async fn delete_source(&self, user_id: &str, source_id: &str) -> Result<()> {
        self.sources
            .write()
            .unwrap()
            .remove(&(user_id.to_string(), source_id.to_string()));
        Ok(())
    }

    async fn set_favorite(&self, user_id: &str, source_id: &str, favorite: bool) -> Result<()> {
        let mut sources = self.sources.write().unwrap();
        if let Some(s) = sources.get_mut(&(user_id.to_string(), source_id.to_string())) {
            s.meta.favorite = favorite;
        }
        Ok(())
    }

    async fn scan_fragments(
        &self,
        user_id: &str,
        filter: ContentFilter,
    ) -> Result<Vec<FragmentHit>> {
        let sources = self.sources.read().unwrap();
        let mut hits = Vec::new();
        for ((uid, _), stored) in sources.iter() {
            if uid != user_id || !filter.matches(stored.meta.kind, stored.meta.favorite) {
                continue;
            }
            for (fragment, vector) in &stored.fragments {
                hits.push(FragmentHit {
                    fragment: fragment.clone(),
                    vector: vector.clone(),
                    kind: stored.meta.kind,
                    favorite: stored.meta.favorite,
                    source_created_at: stored.meta.created_at,
                });
            }
        }
        Ok(hits)
    }
}

struct LedgerRow {
    used: i64,
    sub_end: Option<i64>,
}

/// In-memory [`UsageLedger`].
///
/// The admit check-and-increment runs under one mutex acquisition, which
/// is the whole per-user critical section.
pub struct MemoryLedger {
    free_limit: i64,
    rows: Mutex<HashMap<String, LedgerRow>>,
    fail: Mutex<bool>,
}

impl MemoryLedger {
    pub fn new(free_limit: i64) -> Self {
        Self {
            free_limit,
            rows: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn add_user(&self, user_id: &str) {
        self.rows.lock().unwrap().insert(
            user_id.to_string(),
            LedgerRow {
                used: 0,
                sub_end: None,
            },
        );
    }

    pub fn set_used(&self, user_id: &str, used: i64) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(user_id) {
            row.used = used;
        }
    }

    pub fn set_subscription_end(&self, user_id: &str, end: i64) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(user_id) {
            row.sub_end = Some(end);
        }
    }

    pub fn used(&self, user_id: &str) -> i64 {
        self.rows
            .lock()
            .unwrap()
            .get(user_id)
            .map(|r| r.used)
            .unwrap_or(0)
    }

    /// Make subsequent ledger calls fail, for ledger-outage paths.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn admit(&self, user_id: &str) -> Result<Admission> {
        if *self.fail.lock().unwrap() {
            bail!("ledger unavailable");
        }
        let mut rows = self.rows.lock().unwrap();
        let row = match rows.get_mut(user_id) {
            Some(r) => r,
            None => bail!("unknown user: {}", user_id),
        };

        let now = chrono::Utc::now().timestamp();
        match row.sub_end {
            Some(end) if now < end => return Ok(Admission::subscription()),
            Some(_) => row.sub_end = None, // lazy expiry
            None => {}
        }

        if row.used < self.free_limit {
            row.used += 1;
            Ok(Admission::free(self.free_limit - row.used))
        } else {
            Ok(Admission::rejected())
        }
    }

    async fn release(&self, user_id: &str, admission: &Admission) -> Result<()> {
        if admission.via_subscription {
            return Ok(());
        }
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(user_id) {
            row.used = (row.used - 1).max(0);
        }
        Ok(())
    }

    async fn commit(&self, _user_id: &str, _admission: &Admission) -> Result<()> {
        if *self.fail.lock().unwrap() {
            bail!("ledger unavailable");
        }
        Ok(())
    }
}

/// In-memory append-only [`CallSink`].
#[derive(Default)]
pub struct MemoryCallLog {
    entries: Mutex<Vec<CallLogEntry>>,
    fail: Mutex<bool>,
}

impl MemoryCallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CallLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make subsequent appends fail, for the telemetry-swallow contract.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl CallSink for MemoryCallLog {
    async fn append(&self, entry: &CallLogEntry) -> Result<()> {
        if *self.fail.lock().unwrap() {
            bail!("call log write failed");
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// In-memory write-only [`HistorySink`].
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<(String, QueryResult, String)>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, QueryResult, String)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, user_id: &str, result: &QueryResult, outcome: &str) -> Result<()> {
        self.records.lock().unwrap().push((
            user_id.to_string(),
            result.clone(),
            outcome.to_string(),
        ));
        Ok(())
    }
}
