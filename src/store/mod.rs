//! Item store for tracked news articles.
//!
//! Holds the queued items in insertion order plus at most one current-page
//! item. Every mutation goes through [`ItemStore::update_status`], which
//! validates the lifecycle transition and applies an [`ItemPatch`]
//! atomically: the patch is applied to a copy, checked, then committed.
//!
//! The store itself is synchronous; it is shared across tasks as
//! [`SharedStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::verdict::AnalysisResult;

/// Store shared between the orchestrator, the server and the CLI.
pub type SharedStore = Arc<Mutex<ItemStore>>;

/// Stable handle of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Added, never analyzed.
    #[default]
    Pending,
    /// A run is in flight.
    Analyzing,
    /// All rounds done, `final_result` set.
    Completed,
    /// Last run failed or was cancelled.
    Error,
}

impl ItemStatus {
    /// Whether moving from `self` to `to` is a legal lifecycle step.
    /// Staying in the same status is always allowed (patch only).
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        self == to
            || matches!(
                (self, to),
                (Pending, Analyzing) | (Analyzing, Completed) | (Analyzing, Error) | (Error, Analyzing)
            )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Analyzing => write!(f, "analyzing"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ItemStatus::Pending),
            "analyzing" => Ok(ItemStatus::Analyzing),
            "completed" => Ok(ItemStatus::Completed),
            "error" => Ok(ItemStatus::Error),
            _ => Err(format!("Unknown item status: {}", s)),
        }
    }
}

/// Category of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Quota,
    Cancelled,
    Config,
    Timeout,
    /// The process stopped while the item was analyzing.
    Interrupted,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Transport => "transport",
            FailureKind::Quota => "quota",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Config => "config",
            FailureKind::Timeout => "timeout",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Why an item is in [`ItemStatus::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    /// User-facing message.
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

/// An article found by an external search, compared against the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparedArticle {
    pub title: String,
    #[serde(alias = "displayLink", default)]
    pub display_link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(alias = "crawledContent", default, skip_serializing_if = "Option::is_none")]
    pub crawled_content: Option<String>,
}

/// External comparison data folded into cross-verification prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheckContext {
    #[serde(default)]
    pub articles: Vec<ComparedArticle>,
    /// Precomputed agreement assessment, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One side of a comparison, copied when the comparison item is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSide {
    pub id: ItemId,
    pub title: String,
    pub content: String,
    /// The side's displayed result at creation time, if it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
}

impl ComparisonSide {
    fn of(item: &NewsItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            content: item.content.clone(),
            result: item
                .final_result
                .clone()
                .or_else(|| item.verification_history.last().cloned()),
        }
    }
}

/// The two articles a comparison item weighs against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub source: ComparisonSide,
    pub target: ComparisonSide,
}

/// One tracked article and its verification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: ItemId,
    pub title: String,
    pub url: String,
    pub content: String,
    pub status: ItemStatus,
    pub baseline_analysis: Option<AnalysisResult>,
    #[serde(default)]
    pub verification_history: Vec<AnalysisResult>,
    #[serde(default)]
    pub current_verification_step: u32,
    #[serde(default)]
    pub cross_verified: bool,
    pub final_result: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_check: Option<FactCheckContext>,
    /// Set on items created by [`ItemStore::add_comparison`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    pub progress_message: Option<String>,
    pub failure: Option<ItemFailure>,
    /// Number of rounds this item must complete, fixed when a run starts.
    pub target_rounds: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub analysis_started_at: Option<DateTime<Utc>>,
}

impl NewsItem {
    fn new(id: ItemId, title: String, url: String, content: String) -> Self {
        Self {
            id,
            title,
            url,
            content,
            status: ItemStatus::Pending,
            baseline_analysis: None,
            verification_history: Vec::new(),
            current_verification_step: 0,
            cross_verified: false,
            final_result: None,
            fact_check: None,
            comparison: None,
            progress_message: None,
            failure: None,
            target_rounds: None,
            created_at: Utc::now(),
            analysis_started_at: None,
        }
    }

    /// Normalized form of the item's URL.
    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }

    pub fn is_comparison(&self) -> bool {
        self.comparison.is_some()
    }

    /// Whether every target round has completed.
    pub fn rounds_done(&self) -> bool {
        self.target_rounds
            .map(|target| self.current_verification_step >= target)
            .unwrap_or(false)
    }
}

/// Changes applied together with a status update.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub progress_message: Option<String>,
    /// Result of a completed round; appended to the history.
    pub round_result: Option<AnalysisResult>,
    /// Copy the last history entry into `final_result`.
    pub finalize: bool,
    pub cross_verified: Option<bool>,
    pub failure: Option<ItemFailure>,
    pub target_rounds: Option<u32>,
    pub analysis_started_at: Option<DateTime<Utc>>,
}

impl ItemPatch {
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            progress_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn round(result: AnalysisResult) -> Self {
        Self {
            round_result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(failure: ItemFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }
}

/// Serializable image of the queued items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub items: Vec<NewsItem>,
    pub next_id: u64,
}

/// Ordered, keyed collection of tracked items.
#[derive(Debug)]
pub struct ItemStore {
    items: HashMap<ItemId, NewsItem>,
    /// Queued item ids in insertion order.
    queue: Vec<ItemId>,
    current: Option<ItemId>,
    next_id: u64,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            queue: Vec::new(),
            current: None,
            next_id: 1,
        }
    }

    /// Wrap a store for sharing across tasks.
    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn allocate(&mut self, title: String, url: String, content: String) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        self.items.insert(id, NewsItem::new(id, title, url, content));
        id
    }

    fn find_queued(&self, normalized: &str) -> Option<ItemId> {
        self.queue.iter().copied().find(|id| {
            self.items
                .get(id)
                .map(|item| !item.is_comparison() && item.normalized_url() == normalized)
                .unwrap_or(false)
        })
    }

    /// Queue an article. An article whose normalized URL is already queued
    /// (or is the current page) keeps its existing id.
    pub fn add(
        &mut self,
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> ItemId {
        let url = url.into();
        let normalized = normalize_url(&url);

        if let Some(existing) = self.find_queued(&normalized) {
            debug!(item_id = %existing, url = %normalized, "Article already queued");
            return existing;
        }

        if let Some(current) = self.current_matching(&normalized) {
            self.queue.push(current);
            return current;
        }

        let id = self.allocate(title.into(), url, content.into());
        self.queue.push(id);
        debug!(item_id = %id, url = %normalized, "Article queued");
        id
    }

    /// Queue a comparison of two tracked items. Comparison items have no
    /// URL and are never de-duplicated.
    pub fn add_comparison(&mut self, source: ItemId, target: ItemId) -> StoreResult<ItemId> {
        if source == target {
            return Err(StoreError::SelfComparison { id: source });
        }
        let side = |id: ItemId| {
            self.items
                .get(&id)
                .map(ComparisonSide::of)
                .ok_or(StoreError::ItemNotFound { id })
        };
        let source = side(source)?;
        let target = side(target)?;

        let title = format!("[비교분석] {} vs {}", source.title, target.title);
        let content = format!(
            "비교 대상 1: {}\n{}\n\n비교 대상 2: {}\n{}",
            source.title, source.content, target.title, target.content
        );

        let id = self.allocate(title, String::new(), content);
        if let Some(item) = self.items.get_mut(&id) {
            item.comparison = Some(Comparison { source, target });
        }
        self.queue.push(id);
        debug!(item_id = %id, "Comparison queued");
        Ok(id)
    }

    fn current_matching(&self, normalized: &str) -> Option<ItemId> {
        let id = self.current?;
        let item = self.items.get(&id)?;
        (item.normalized_url() == normalized).then_some(id)
    }

    pub fn get(&self, id: ItemId) -> Option<&NewsItem> {
        self.items.get(&id)
    }

    /// Clone of an item, or `ItemNotFound`.
    pub fn require(&self, id: ItemId) -> StoreResult<NewsItem> {
        self.items
            .get(&id)
            .cloned()
            .ok_or(StoreError::ItemNotFound { id })
    }

    /// Apply a status change and patch to one item.
    pub fn update_status(
        &mut self,
        id: ItemId,
        status: ItemStatus,
        patch: ItemPatch,
    ) -> StoreResult<&NewsItem> {
        let current = self.items.get(&id).ok_or(StoreError::ItemNotFound { id })?;
        let from = current.status;

        if !from.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }

        let mut updated = current.clone();
        updated.status = status;

        if from != ItemStatus::Analyzing && status == ItemStatus::Analyzing {
            updated.failure = None;
        }
        if let Some(message) = patch.progress_message {
            updated.progress_message = Some(message);
        }
        if let Some(target) = patch.target_rounds {
            updated.target_rounds = Some(target);
        }
        if let Some(started) = patch.analysis_started_at {
            updated.analysis_started_at = Some(started);
        }
        if let Some(result) = patch.round_result {
            if updated.baseline_analysis.is_none() {
                updated.baseline_analysis = Some(result.clone());
            }
            updated.verification_history.push(result);
            updated.current_verification_step += 1;
        }
        if let Some(cross_verified) = patch.cross_verified {
            updated.cross_verified = cross_verified;
        }
        if patch.finalize {
            updated.final_result = updated.verification_history.last().cloned();
        }
        if status == ItemStatus::Error {
            updated.failure = Some(
                patch
                    .failure
                    .or(updated.failure.take())
                    .unwrap_or_else(|| ItemFailure::new(FailureKind::Internal, "알 수 없는 오류")),
            );
        }

        if status == ItemStatus::Completed
            && (updated.final_result.is_none() || !updated.rounds_done())
        {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }

        self.items.insert(id, updated);
        self.items.get(&id).ok_or(StoreError::ItemNotFound { id })
    }

    /// Attach external fact-check data to an item.
    pub fn attach_fact_check(&mut self, id: ItemId, context: FactCheckContext) -> StoreResult<()> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or(StoreError::ItemNotFound { id })?;
        item.fact_check = Some(context);
        Ok(())
    }

    /// Remove an item entirely.
    pub fn delete(&mut self, id: ItemId) -> StoreResult<NewsItem> {
        let item = self
            .items
            .remove(&id)
            .ok_or(StoreError::ItemNotFound { id })?;
        self.queue.retain(|queued| *queued != id);
        if self.current == Some(id) {
            self.current = None;
        }
        Ok(item)
    }

    /// Queued items in insertion order.
    pub fn list(&self) -> Vec<&NewsItem> {
        self.queue
            .iter()
            .filter_map(|id| self.items.get(id))
            .collect()
    }

    /// Number of tracked items, the current page included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.items.clear();
        self.queue.clear();
        self.current = None;
    }

    /// Record the article shown on the current page.
    ///
    /// A queued item with the same normalized URL becomes the current item.
    /// Otherwise a new detached item is created; a previous detached
    /// current item is dropped and its id returned in `replaced`.
    pub fn set_current(
        &mut self,
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> CurrentChange {
        let url = url.into();
        let normalized = normalize_url(&url);

        if let Some(id) = self.current_matching(&normalized) {
            return CurrentChange { id, replaced: None };
        }

        let replaced = self.current.take().filter(|old| !self.queue.contains(old));
        if let Some(old) = replaced {
            self.items.remove(&old);
        }

        let id = match self.find_queued(&normalized) {
            Some(queued) => queued,
            None => self.allocate(title.into(), url, content.into()),
        };
        self.current = Some(id);
        CurrentChange { id, replaced }
    }

    pub fn current(&self) -> Option<&NewsItem> {
        self.current.and_then(|id| self.items.get(&id))
    }

    /// Queue the current-page item. Returns its id.
    pub fn enqueue_current(&mut self) -> Option<ItemId> {
        let id = self.current?;
        if !self.queue.contains(&id) {
            self.queue.push(id);
        }
        Some(id)
    }

    /// Image of the queued items for persistence.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            items: self.list().into_iter().cloned().collect(),
            next_id: self.next_id,
        }
    }

    /// Replace the queue with persisted items. Items that were analyzing
    /// when the snapshot was taken come back as interrupted errors.
    pub fn restore(&mut self, items: Vec<NewsItem>, next_id: u64) {
        self.clear();

        let mut highest = 0;
        for mut item in items {
            if item.status == ItemStatus::Analyzing {
                warn!(item_id = %item.id, "Restored item was interrupted mid-analysis");
                item.status = ItemStatus::Error;
                item.failure = Some(ItemFailure::new(
                    FailureKind::Interrupted,
                    "분석이 중단되었습니다. 다시 시도해 주세요.",
                ));
            }
            highest = highest.max(item.id.0);
            self.queue.push(item.id);
            self.items.insert(item.id, item);
        }

        self.next_id = next_id.max(highest + 1).max(1);
    }
}

/// Result of [`ItemStore::set_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentChange {
    pub id: ItemId,
    /// Detached item dropped to make room, if any.
    pub replaced: Option<ItemId>,
}

/// Reduce a URL to scheme, host, port and path. Unparsable input is
/// returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(parsed) if parsed.has_host() => {
            format!("{}{}", parsed.origin().ascii_serialization(), parsed.path())
        }
        _ => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Verdict;
    use pretty_assertions::assert_eq;

    fn verdict(label: &str) -> AnalysisResult {
        Verdict::with_label(label).into()
    }

    fn start(store: &mut ItemStore, id: ItemId, target: u32) {
        store
            .update_status(
                id,
                ItemStatus::Analyzing,
                ItemPatch {
                    target_rounds: Some(target),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://n.news.naver.com/article/001/0001?sid=100#top"),
            "https://n.news.naver.com/article/001/0001"
        );
        assert_eq!(
            normalize_url("http://localhost:8080/a/b?x=1"),
            "http://localhost:8080/a/b"
        );
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_add_assigns_increasing_ids() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "본문 A");
        let b = store.add("B", "https://news.example/b", "본문 B");
        assert!(b > a);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).unwrap().status, ItemStatus::Pending);
    }

    #[test]
    fn test_add_dedupes_by_normalized_url() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a?ref=main", "본문");
        let again = store.add("A'", "https://news.example/a#comments", "다른 본문");
        assert_eq!(a, again);
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get(a).unwrap().title, "A");
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "");
        store.delete(a).unwrap();
        let b = store.add("A", "https://news.example/a", "");
        assert_ne!(a, b);
        assert!(store.get(a).is_none());
    }

    #[test]
    fn test_list_in_insertion_order() {
        let mut store = ItemStore::new();
        let ids: Vec<_> = ["c", "a", "b"]
            .iter()
            .map(|slug| store.add(*slug, format!("https://news.example/{}", slug), ""))
            .collect();
        let listed: Vec<_> = store.list().iter().map(|item| item.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_round_patch_keeps_history_in_step() {
        let mut store = ItemStore::new();
        let id = store.add("A", "https://news.example/a", "");
        start(&mut store, id, 2);

        let item = store
            .update_status(id, ItemStatus::Analyzing, ItemPatch::round(verdict("사실")))
            .unwrap();
        assert_eq!(item.current_verification_step, 1);
        assert_eq!(item.verification_history.len(), 1);
        assert_eq!(item.baseline_analysis, Some(verdict("사실")));

        let item = store
            .update_status(id, ItemStatus::Analyzing, ItemPatch::round(verdict("대체로 사실")))
            .unwrap();
        assert_eq!(item.current_verification_step, 2);
        assert_eq!(item.verification_history.len(), 2);
        assert_eq!(item.baseline_analysis, Some(verdict("사실")));
    }

    #[test]
    fn test_complete_requires_all_rounds_and_final_result() {
        let mut store = ItemStore::new();
        let id = store.add("A", "https://news.example/a", "");
        start(&mut store, id, 2);
        store
            .update_status(id, ItemStatus::Analyzing, ItemPatch::round(verdict("사실")))
            .unwrap();

        let early = store.update_status(
            id,
            ItemStatus::Completed,
            ItemPatch {
                finalize: true,
                ..Default::default()
            },
        );
        assert!(matches!(early, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(store.get(id).unwrap().status, ItemStatus::Analyzing);

        let item = store
            .update_status(
                id,
                ItemStatus::Completed,
                ItemPatch {
                    round_result: Some(verdict("대체로 사실")),
                    finalize: true,
                    cross_verified: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.final_result, Some(verdict("대체로 사실")));
        assert!(item.cross_verified);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut store = ItemStore::new();
        let id = store.add("A", "https://news.example/a", "");

        let err = store
            .update_status(id, ItemStatus::Completed, ItemPatch::default())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ItemStatus::Pending,
                to: ItemStatus::Completed,
                ..
            }
        ));

        let missing = store.update_status(ItemId(99), ItemStatus::Analyzing, ItemPatch::default());
        assert!(matches!(missing, Err(StoreError::ItemNotFound { .. })));
    }

    #[test]
    fn test_error_then_retry_clears_failure() {
        let mut store = ItemStore::new();
        let id = store.add("A", "https://news.example/a", "");
        start(&mut store, id, 1);

        let item = store
            .update_status(
                id,
                ItemStatus::Error,
                ItemPatch::failed(ItemFailure::new(FailureKind::Transport, "네트워크 오류")),
            )
            .unwrap();
        assert_eq!(item.failure.as_ref().unwrap().kind, FailureKind::Transport);

        let item = store
            .update_status(id, ItemStatus::Analyzing, ItemPatch::default())
            .unwrap();
        assert!(item.failure.is_none());
        assert_eq!(item.target_rounds, Some(1));
    }

    #[test]
    fn test_set_current_reuses_queued_item() {
        let mut store = ItemStore::new();
        let queued = store.add("A", "https://news.example/a", "");
        let change = store.set_current("A", "https://news.example/a?from=home", "");
        assert_eq!(change.id, queued);
        assert_eq!(change.replaced, None);
        assert_eq!(store.current().unwrap().id, queued);
    }

    #[test]
    fn test_set_current_replaces_detached_item() {
        let mut store = ItemStore::new();
        let first = store.set_current("A", "https://news.example/a", "").id;
        assert!(store.list().is_empty());

        let change = store.set_current("B", "https://news.example/b", "");
        assert_eq!(change.replaced, Some(first));
        assert!(store.get(first).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_enqueue_current_and_add_match() {
        let mut store = ItemStore::new();
        let current = store.set_current("A", "https://news.example/a", "").id;

        assert_eq!(store.add("A", "https://news.example/a", ""), current);
        assert_eq!(store.enqueue_current(), Some(current));
        assert_eq!(store.list().len(), 1);

        let other = store.set_current("B", "https://news.example/b", "");
        assert_eq!(other.replaced, None);
        assert!(store.get(current).is_some());
    }

    #[test]
    fn test_delete_current() {
        let mut store = ItemStore::new();
        let id = store.set_current("A", "https://news.example/a", "").id;
        store.delete(id).unwrap();
        assert!(store.current().is_none());
        assert!(matches!(
            store.delete(id),
            Err(StoreError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_restore_marks_interrupted() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "");
        let b = store.add("B", "https://news.example/b", "");
        start(&mut store, b, 3);
        let snapshot = store.snapshot();

        let mut restored = ItemStore::new();
        restored.restore(snapshot.items, snapshot.next_id);

        assert_eq!(restored.get(a).unwrap().status, ItemStatus::Pending);
        let item = restored.get(b).unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(
            item.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::Interrupted)
        );

        let c = restored.add("C", "https://news.example/c", "");
        assert!(c > b);
    }

    #[test]
    fn test_add_comparison_copies_both_sides() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "본문 A");
        let b = store.add("B", "https://news.example/b", "본문 B");
        start(&mut store, a, 1);
        store
            .update_status(
                a,
                ItemStatus::Completed,
                ItemPatch {
                    round_result: Some(verdict("사실")),
                    finalize: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let id = store.add_comparison(a, b).unwrap();
        let item = store.get(id).unwrap();

        assert_eq!(item.title, "[비교분석] A vs B");
        assert_eq!(item.url, "");
        assert_eq!(item.content, "비교 대상 1: A\n본문 A\n\n비교 대상 2: B\n본문 B");
        assert_eq!(item.status, ItemStatus::Pending);
        let comparison = item.comparison.as_ref().unwrap();
        assert_eq!(comparison.source.result, Some(verdict("사실")));
        assert_eq!(comparison.target.result, None);
        assert_eq!(store.list().last().map(|item| item.id), Some(id));
    }

    #[test]
    fn test_add_comparison_is_never_deduplicated() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "");
        let b = store.add("B", "https://news.example/b", "");

        let first = store.add_comparison(a, b).unwrap();
        let second = store.add_comparison(a, b).unwrap();
        assert_ne!(first, second);

        // An article with no URL is not folded into a comparison item
        let plain = store.add("C", "", "");
        assert_ne!(plain, first);
        assert_ne!(plain, second);
    }

    #[test]
    fn test_add_comparison_rejects_bad_ids() {
        let mut store = ItemStore::new();
        let a = store.add("A", "https://news.example/a", "");

        assert!(matches!(
            store.add_comparison(a, a),
            Err(StoreError::SelfComparison { .. })
        ));
        assert!(matches!(
            store.add_comparison(a, ItemId(99)),
            Err(StoreError::ItemNotFound { id: ItemId(99) })
        ));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(ItemStatus::Analyzing.to_string(), "analyzing");
        assert_eq!("Completed".parse::<ItemStatus>(), Ok(ItemStatus::Completed));
        assert!("done".parse::<ItemStatus>().is_err());
        assert_eq!(
            serde_json::to_value(ItemStatus::Error).unwrap(),
            serde_json::json!("error")
        );
    }
}
