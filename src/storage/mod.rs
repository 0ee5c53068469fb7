//! Storage layer for verdicts and queued items.
//!
//! Two concerns are persisted in SQLite: the last known verdict per
//! normalized article URL (used to restore highlighting on revisit) and a
//! snapshot of the queued items with the id counter.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StorageResult;
use crate::store::{normalize_url, NewsItem, StoreSnapshot};
use crate::verdict::AnalysisResult;

/// Last known verdict for an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// Normalized article URL.
    pub url: String,
    /// Verdict label as returned by the model.
    pub verdict: String,
    /// Suspect sentence mapped to its reason.
    #[serde(default)]
    pub suspicious: BTreeMap<String, String>,
    pub saved_at: DateTime<Utc>,
}

impl VerdictRecord {
    pub fn new(url: &str, verdict: impl Into<String>) -> Self {
        Self {
            url: normalize_url(url),
            verdict: verdict.into(),
            suspicious: BTreeMap::new(),
            saved_at: Utc::now(),
        }
    }

    pub fn with_suspicious(mut self, suspicious: BTreeMap<String, String>) -> Self {
        self.suspicious = suspicious;
        self
    }

    /// Record for a finalized item. Raw results, results without a label
    /// and comparison items are not recorded.
    pub fn from_item(item: &NewsItem) -> Option<Self> {
        if item.is_comparison() {
            return None;
        }
        let verdict = match item.final_result.as_ref()? {
            AnalysisResult::Structured(verdict) => verdict,
            AnalysisResult::Raw(_) => return None,
        };
        let label = verdict.label.as_deref().filter(|l| !l.trim().is_empty())?;
        Some(Self::new(&item.url, label).with_suspicious(verdict.suspicious_or_empty()))
    }
}

/// Storage trait for persistence
#[async_trait]
pub trait Storage: Send + Sync {
    // Verdict operations

    /// Insert or replace the verdict for `record.url`.
    async fn save_verdict(&self, record: &VerdictRecord) -> StorageResult<()>;
    /// Look up a verdict by article URL (normalized before lookup).
    async fn get_verdict(&self, url: &str) -> StorageResult<Option<VerdictRecord>>;
    /// Remove a verdict. Returns whether one existed.
    async fn delete_verdict(&self, url: &str) -> StorageResult<bool>;
    /// Number of stored verdicts.
    async fn count_verdicts(&self) -> StorageResult<u64>;

    // Item snapshot operations

    /// Replace the persisted queue with `snapshot`.
    async fn save_snapshot(&self, snapshot: &StoreSnapshot) -> StorageResult<()>;
    /// Load the persisted queue, `None` if nothing was ever saved.
    async fn load_snapshot(&self) -> StorageResult<Option<StoreSnapshot>>;
}
