//! Self-feedback verification orchestrator.
//!
//! Each started item gets one spawned task that runs its rounds strictly in
//! sequence. Round 1 analyzes the article on its own; every later round
//! cross-verifies the baseline and all earlier verifications. A round is
//! committed to the store before the next round's prompt is built, so the
//! prompt is always derived from committed state.
//!
//! Lock order is `active` then `store`. Neither lock is held across a
//! gateway call, a pause or a presentation callback. `snapshot_lock` is
//! taken before `store` and is held across the snapshot write, so saves
//! land in the order their snapshots were taken.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{clamp_depth, VerificationConfig};
use crate::error::{AppError, AppResult, GatewayError, StoreError};
use crate::gateway::{GatewayRequest, ModelGateway};
use crate::parser::parse_response;
use crate::presentation::Presentation;
use crate::prompts::{
    round_progress, round_prompt, timeout_message, transport_message, INITIAL_PROGRESS,
    MSG_CANCELLED, MSG_COMPLETED, MSG_MISSING_KEY, MSG_QUOTA,
};
use crate::storage::{Storage, VerdictRecord};
use crate::store::{FailureKind, ItemFailure, ItemId, ItemPatch, ItemStatus, NewsItem, SharedStore};
use crate::verdict::AnalysisResult;

/// Pause unit the round-1 progress delays are expressed in.
const BASE_INTERVAL_MS: u64 = 400;

/// Per-run parameters fixed when the run starts.
#[derive(Debug, Clone, Copy)]
struct RunPlan {
    /// Distinguishes log lines of successive runs of one item.
    run_id: Uuid,
    target: u32,
    streaming: bool,
    interval: Duration,
    timeout: Duration,
}

/// Why a run stopped before finalizing.
#[derive(Debug)]
enum RunFailure {
    Cancelled,
    Timeout,
    Gateway(GatewayError),
    Store(StoreError),
    Internal(String),
}

impl From<GatewayError> for RunFailure {
    fn from(err: GatewayError) -> Self {
        if err.is_cancelled() {
            RunFailure::Cancelled
        } else {
            RunFailure::Gateway(err)
        }
    }
}

impl From<StoreError> for RunFailure {
    fn from(err: StoreError) -> Self {
        RunFailure::Store(err)
    }
}

impl RunFailure {
    /// User-facing failure, or `None` when the item no longer exists.
    fn describe(&self, plan: &RunPlan) -> Option<ItemFailure> {
        let failure = match self {
            RunFailure::Cancelled => ItemFailure::new(FailureKind::Cancelled, MSG_CANCELLED),
            RunFailure::Timeout => ItemFailure::new(
                FailureKind::Timeout,
                timeout_message(plan.timeout.as_secs() / 60),
            ),
            RunFailure::Gateway(err) => match err.root() {
                GatewayError::Cancelled => ItemFailure::new(FailureKind::Cancelled, MSG_CANCELLED),
                GatewayError::Quota { .. } => ItemFailure::new(FailureKind::Quota, MSG_QUOTA),
                GatewayError::MissingApiKey => {
                    ItemFailure::new(FailureKind::Config, MSG_MISSING_KEY)
                }
                _ => ItemFailure::new(FailureKind::Transport, transport_message(&err.to_string())),
            },
            RunFailure::Store(StoreError::ItemNotFound { .. }) => return None,
            RunFailure::Store(err) => {
                ItemFailure::new(FailureKind::Internal, transport_message(&err.to_string()))
            }
            RunFailure::Internal(message) => {
                ItemFailure::new(FailureKind::Internal, transport_message(message))
            }
        };
        Some(failure)
    }
}

/// Drives items through their verification rounds.
#[derive(Clone)]
pub struct Orchestrator {
    store: SharedStore,
    gateway: Arc<dyn ModelGateway>,
    presentation: Arc<dyn Presentation>,
    verdicts: Option<Arc<dyn Storage>>,
    /// Whether queue snapshots are written to `verdicts`.
    persist_queue: bool,
    snapshot_lock: Arc<Mutex<()>>,
    settings: Arc<RwLock<VerificationConfig>>,
    active: Arc<Mutex<HashMap<ItemId, CancellationToken>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("persists_verdicts", &self.verdicts.is_some())
            .field("persists_queue", &self.persist_queue)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        gateway: Arc<dyn ModelGateway>,
        presentation: Arc<dyn Presentation>,
        settings: VerificationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            presentation,
            verdicts: None,
            persist_queue: false,
            snapshot_lock: Arc::new(Mutex::new(())),
            settings: Arc::new(RwLock::new(settings)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist verdicts and queue snapshots to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.verdicts = Some(storage);
        self.persist_queue = true;
        self
    }

    /// Persist verdicts to `storage` but never overwrite its saved queue.
    /// For stores that hold only a slice of the queue, like a one-off CLI run.
    pub fn with_verdict_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.verdicts = Some(storage);
        self.persist_queue = false;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Begin verification of a pending item.
    ///
    /// The current settings are snapshotted into the item: later changes
    /// to `enabled` or `depth` do not affect this run or its retries.
    pub async fn start(&self, id: ItemId) -> AppResult<JoinHandle<()>> {
        self.launch(id, ItemStatus::Pending).await
    }

    /// Queue a comparison of two tracked items and start it right away.
    ///
    /// The comparison item stays queued even when starting fails, like a
    /// plain item added without an API key.
    pub async fn compare(
        &self,
        source: ItemId,
        target: ItemId,
    ) -> AppResult<(ItemId, JoinHandle<()>)> {
        let id = self.store.lock().await.add_comparison(source, target)?;
        info!(item_id = %id, source = %source, target = %target, "Comparison created");
        let handle = self.start(id).await?;
        Ok((id, handle))
    }

    /// Resume a failed item at its next round, keeping its baseline,
    /// history and round target.
    pub async fn retry(&self, id: ItemId) -> AppResult<JoinHandle<()>> {
        self.launch(id, ItemStatus::Error).await
    }

    async fn launch(&self, id: ItemId, expected: ItemStatus) -> AppResult<JoinHandle<()>> {
        let settings = self.settings.read().await.clone();

        let mut active = self.active.lock().await;
        if active.contains_key(&id) {
            return Err(StoreError::AlreadyRunning { id }.into());
        }

        let mut store = self.store.lock().await;
        let item = store.require(id)?;
        if item.status != expected {
            return Err(StoreError::InvalidTransition {
                id,
                from: item.status,
                to: ItemStatus::Analyzing,
            }
            .into());
        }

        if !self.gateway.is_configured() {
            store.update_status(id, item.status, ItemPatch::progress(MSG_MISSING_KEY))?;
            drop(store);
            drop(active);
            warn!(item_id = %id, "Analysis requested without an API key");
            self.presentation.on_progress(id, MSG_MISSING_KEY);
            return Err(AppError::Config {
                message: "GEMINI_API_KEY is not set".to_string(),
            });
        }

        let target = item
            .target_rounds
            .unwrap_or_else(|| settings.target_rounds());
        let plan = RunPlan {
            run_id: Uuid::new_v4(),
            target,
            streaming: settings.streaming,
            interval: Duration::from_millis(settings.progress_interval_ms),
            timeout: settings.timeout_for(target),
        };

        store.update_status(
            id,
            ItemStatus::Analyzing,
            ItemPatch {
                target_rounds: Some(target),
                analysis_started_at: Some(item.analysis_started_at.unwrap_or_else(Utc::now)),
                ..Default::default()
            },
        )?;

        let token = CancellationToken::new();
        active.insert(id, token.clone());
        drop(store);
        drop(active);

        info!(
            item_id = %id,
            run_id = %plan.run_id,
            target_rounds = target,
            resume_step = item.current_verification_step,
            "Analysis started"
        );

        let this = self.clone();
        Ok(tokio::spawn(async move { this.run(id, plan, token).await }))
    }

    /// Stop the in-flight run of `id`. The running round is abandoned
    /// without touching the history.
    pub async fn cancel(&self, id: ItemId) -> AppResult<()> {
        let active = self.active.lock().await;
        let token = active.get(&id).ok_or(StoreError::NotRunning { id })?;
        token.cancel();
        info!(item_id = %id, "Analysis cancellation requested");
        Ok(())
    }

    /// Cancel any run of `id`, then remove the item and its saved verdict.
    pub async fn delete(&self, id: ItemId) -> AppResult<NewsItem> {
        let item = {
            let mut active = self.active.lock().await;
            if let Some(token) = active.remove(&id) {
                token.cancel();
            }
            self.store.lock().await.delete(id)?
        };

        if let (Some(storage), false) = (&self.verdicts, item.is_comparison()) {
            if let Err(e) = storage.delete_verdict(&item.url).await {
                warn!(item_id = %id, error = %e, "Failed to delete saved verdict");
            }
        }

        info!(item_id = %id, "News item deleted");
        Ok(item)
    }

    /// Whether `id` has a run in flight.
    pub async fn is_running(&self, id: ItemId) -> bool {
        self.active.lock().await.contains_key(&id)
    }

    /// Ids with a run in flight.
    pub async fn running(&self) -> Vec<ItemId> {
        let mut ids: Vec<_> = self.active.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    // Settings

    pub async fn settings(&self) -> VerificationConfig {
        self.settings.read().await.clone()
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.settings.write().await.enabled = enabled;
        info!(enabled, "Self-feedback setting changed");
    }

    /// Set the verification depth, clamped to the accepted range.
    /// Returns the depth actually stored.
    pub async fn set_depth(&self, depth: u32) -> u32 {
        let depth = clamp_depth(depth);
        self.settings.write().await.depth = depth;
        info!(depth, "Verification depth changed");
        depth
    }

    pub async fn update_settings(
        &self,
        enabled: Option<bool>,
        depth: Option<u32>,
    ) -> VerificationConfig {
        let mut settings = self.settings.write().await;
        if let Some(enabled) = enabled {
            settings.enabled = enabled;
        }
        if let Some(depth) = depth {
            settings.depth = clamp_depth(depth);
        }
        info!(enabled = settings.enabled, depth = settings.depth, "Settings updated");
        settings.clone()
    }

    /// Save the queue snapshot if queue persistence is enabled.
    pub async fn persist_snapshot(&self) {
        let Some(storage) = self.verdicts.as_ref().filter(|_| self.persist_queue) else {
            return;
        };
        let _ordered = self.snapshot_lock.lock().await;
        let snapshot = self.store.lock().await.snapshot();
        if let Err(e) = storage.save_snapshot(&snapshot).await {
            warn!(error = %e, "Failed to persist item snapshot");
        }
    }

    // Run task

    async fn run(self, id: ItemId, plan: RunPlan, token: CancellationToken) {
        let outcome = tokio::select! {
            outcome = self.drive(id, &plan, &token) => outcome,
            _ = tokio::time::sleep(plan.timeout) => {
                token.cancel();
                Err(RunFailure::Timeout)
            }
        };

        match outcome {
            Ok(item) => self.complete(item, &plan).await,
            Err(failure) => self.fail(id, failure, &plan).await,
        }
        self.persist_snapshot().await;
    }

    async fn drive(
        &self,
        id: ItemId,
        plan: &RunPlan,
        token: &CancellationToken,
    ) -> Result<NewsItem, RunFailure> {
        loop {
            let item = self.store.lock().await.require(id)?;
            if item.current_verification_step >= plan.target {
                return self.finalize(id, plan).await;
            }
            if token.is_cancelled() {
                return Err(RunFailure::Cancelled);
            }

            let round = item.current_verification_step + 1;
            self.announce_round(id, round, plan, token).await?;

            let prompt = round_prompt(&item, round, plan.target).ok_or_else(|| {
                RunFailure::Internal(format!("round {} has no baseline analysis", round))
            })?;

            let started = Instant::now();
            let presentation = self.presentation.clone();
            let on_chunk = move |text: &str| presentation.on_partial(id, text);
            let request = GatewayRequest::new(prompt).streaming(plan.streaming);
            let raw = self.gateway.invoke(&request, token, &on_chunk).await?;

            // A result that arrives after cancellation is dropped.
            if token.is_cancelled() {
                return Err(RunFailure::Cancelled);
            }

            let result = parse_response(&raw);
            info!(
                item_id = %id,
                run_id = %plan.run_id,
                round,
                target_rounds = plan.target,
                latency_ms = started.elapsed().as_millis() as u64,
                label = %result.label(),
                raw = result.is_raw(),
                "Verification round completed"
            );

            self.store
                .lock()
                .await
                .update_status(id, ItemStatus::Analyzing, ItemPatch::round(result))?;
        }
    }

    async fn announce_round(
        &self,
        id: ItemId,
        round: u32,
        plan: &RunPlan,
        token: &CancellationToken,
    ) -> Result<(), RunFailure> {
        if round == 1 {
            for (message, pause_ms) in INITIAL_PROGRESS {
                self.report_progress(id, message).await?;
                let pause = pause_ms * plan.interval.as_millis() as u64 / BASE_INTERVAL_MS;
                pause_for(Duration::from_millis(pause), token).await?;
            }
            return Ok(());
        }

        self.presentation.on_round_advance(id, round, plan.target);
        for (index, message) in round_progress(round, plan.target).iter().enumerate() {
            if index > 0 {
                pause_for(plan.interval, token).await?;
            }
            self.report_progress(id, message).await?;
        }
        Ok(())
    }

    async fn report_progress(&self, id: ItemId, message: &str) -> Result<(), RunFailure> {
        self.store
            .lock()
            .await
            .update_status(id, ItemStatus::Analyzing, ItemPatch::progress(message))?;
        self.presentation.on_progress(id, message);
        Ok(())
    }

    async fn finalize(&self, id: ItemId, plan: &RunPlan) -> Result<NewsItem, RunFailure> {
        let mut active = self.active.lock().await;
        let mut store = self.store.lock().await;
        let item = store
            .update_status(
                id,
                ItemStatus::Completed,
                ItemPatch {
                    progress_message: Some(MSG_COMPLETED.to_string()),
                    finalize: true,
                    cross_verified: Some(plan.target > 1),
                    ..Default::default()
                },
            )?
            .clone();
        active.remove(&id);
        Ok(item)
    }

    async fn complete(&self, item: NewsItem, plan: &RunPlan) {
        let Some(result) = item.final_result.as_ref() else {
            error!(item_id = %item.id, "Completed item has no final result");
            return;
        };

        if let (Some(storage), Some(record)) = (&self.verdicts, VerdictRecord::from_item(&item)) {
            if let Err(e) = storage.save_verdict(&record).await {
                warn!(item_id = %item.id, error = %e, "Failed to save verdict");
            }
        }

        info!(
            item_id = %item.id,
            run_id = %plan.run_id,
            rounds = item.current_verification_step,
            cross_verified = item.cross_verified,
            label = %result.label(),
            "Analysis completed"
        );
        self.presentation.on_progress(item.id, MSG_COMPLETED);
        self.presentation.on_complete(item.id, result);
    }

    async fn fail(&self, id: ItemId, failure: RunFailure, plan: &RunPlan) {
        let Some(described) = failure.describe(plan) else {
            self.active.lock().await.remove(&id);
            debug!(item_id = %id, "Item deleted during analysis");
            return;
        };

        let committed = {
            let mut active = self.active.lock().await;
            active.remove(&id);
            let mut store = self.store.lock().await;
            store
                .update_status(
                    id,
                    ItemStatus::Error,
                    ItemPatch {
                        progress_message: Some(described.message.clone()),
                        failure: Some(described.clone()),
                        ..Default::default()
                    },
                )
                .map(|item| item.current_verification_step)
        };

        match committed {
            Ok(step) => {
                if described.is_cancelled() {
                    info!(item_id = %id, run_id = %plan.run_id, step, "Analysis cancelled");
                } else {
                    warn!(
                        item_id = %id,
                        run_id = %plan.run_id,
                        step,
                        kind = %described.kind,
                        error = ?failure,
                        "Analysis failed"
                    );
                }
                self.presentation.on_error(id, &described);
            }
            Err(StoreError::ItemNotFound { .. }) => {
                debug!(item_id = %id, "Item deleted during analysis");
            }
            Err(e) => {
                error!(item_id = %id, error = %e, "Failed to record analysis failure");
            }
        }
    }
}

/// Sleep for `duration` unless `token` fires first.
async fn pause_for(duration: Duration, token: &CancellationToken) -> Result<(), RunFailure> {
    if token.is_cancelled() {
        return Err(RunFailure::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = token.cancelled() => Err(RunFailure::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Final result of an item as shown to the user, if any.
pub fn displayed_result(item: &NewsItem) -> Option<&AnalysisResult> {
    item.final_result
        .as_ref()
        .or_else(|| item.verification_history.last())
}
