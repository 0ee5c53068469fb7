use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::SharedState;
use crate::config::{MAX_DEPTH, MIN_DEPTH};
use crate::error::{AppError, McpError, McpResult, StoreError};
use crate::store::{FactCheckContext, ItemId, NewsItem};

/// Methods answered by [`handle_method`], plus the protocol methods.
pub const METHODS: [&str; 18] = [
    "initialize",
    "ping",
    "news/add",
    "news/setCurrent",
    "news/current",
    "news/list",
    "news/get",
    "news/delete",
    "news/attachFactCheck",
    "analysis/start",
    "analysis/startCurrent",
    "analysis/retry",
    "analysis/cancel",
    "analysis/compare",
    "settings/get",
    "settings/update",
    "verdicts/get",
    "verdicts/delete",
];

/// Route a method call to its handler
pub async fn handle_method(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
) -> McpResult<Value> {
    info!(method = %method, "Routing method call");

    match method {
        "news/add" => handle_news_add(state, params).await,
        "news/setCurrent" => handle_set_current(state, params).await,
        "news/current" => handle_current(state).await,
        "news/list" => handle_list(state).await,
        "news/get" => handle_get(state, params).await,
        "news/delete" => handle_delete(state, params).await,
        "news/attachFactCheck" => handle_attach_fact_check(state, params).await,
        "analysis/start" => handle_start(state, params).await,
        "analysis/startCurrent" => handle_start_current(state).await,
        "analysis/retry" => handle_retry(state, params).await,
        "analysis/cancel" => handle_cancel(state, params).await,
        "analysis/compare" => handle_compare(state, params).await,
        "settings/get" => handle_settings_get(state).await,
        "settings/update" => handle_settings_update(state, params).await,
        "verdicts/get" => handle_verdict_get(state, params).await,
        "verdicts/delete" => handle_verdict_delete(state, params).await,
        _ => Err(McpError::UnknownMethod {
            method: method.to_string(),
        }),
    }
}

/// Scraped article handed over by a site parser.
#[derive(Debug, Deserialize)]
struct ArticleParams {
    title: String,
    url: String,
    content: String,
}

impl ArticleParams {
    fn validate(&self, method: &str) -> McpResult<()> {
        if self.url.trim().is_empty() {
            return Err(invalid(method, "url cannot be empty"));
        }
        if self.title.trim().is_empty() && self.content.trim().is_empty() {
            return Err(invalid(method, "title and content cannot both be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: ItemId,
}

#[derive(Debug, Deserialize)]
struct UrlParams {
    url: String,
}

/// Settings as reported to clients.
#[derive(Debug, Serialize)]
struct SettingsView {
    enabled: bool,
    depth: u32,
    #[serde(rename = "minDepth")]
    min_depth: u32,
    #[serde(rename = "maxDepth")]
    max_depth: u32,
    #[serde(rename = "targetRounds")]
    target_rounds: u32,
}

async fn handle_news_add(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: ArticleParams = parse_params("news/add", params)?;
    params.validate("news/add")?;

    let item = {
        let mut store = state.store.lock().await;
        let id = store.add(params.title, params.url, params.content);
        store.require(id).map_err(AppError::from)?
    };
    state.orchestrator.persist_snapshot().await;

    to_value(item)
}

async fn handle_set_current(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: ArticleParams = parse_params("news/setCurrent", params)?;
    params.validate("news/setCurrent")?;

    let (change, item) = {
        let mut store = state.store.lock().await;
        let change = store.set_current(params.title, params.url, params.content);
        let item = store.require(change.id).map_err(AppError::from)?;
        (change, item)
    };

    if let Some(replaced) = change.replaced {
        match state.orchestrator.cancel(replaced).await {
            Ok(()) => info!(item_id = %replaced, "Cancelled analysis of replaced page"),
            Err(e) => debug!(item_id = %replaced, error = %e, "Replaced page had no running analysis"),
        }
    }

    Ok(json!({
        "item": to_value(item)?,
        "replaced": change.replaced,
    }))
}

async fn handle_current(state: &SharedState) -> McpResult<Value> {
    let current = state.store.lock().await.current().cloned();
    match current {
        Some(item) => to_value(item),
        None => Ok(Value::Null),
    }
}

async fn handle_list(state: &SharedState) -> McpResult<Value> {
    let running = state.orchestrator.running().await;
    let items: Vec<NewsItem> = state
        .store
        .lock()
        .await
        .list()
        .into_iter()
        .cloned()
        .collect();
    Ok(json!({ "items": items, "running": running }))
}

async fn handle_get(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_params("news/get", params)?;
    let item = state
        .store
        .lock()
        .await
        .require(params.id)
        .map_err(AppError::from)?;
    let running = state.orchestrator.is_running(params.id).await;

    let mut value = to_value(item)?;
    if let Value::Object(map) = &mut value {
        map.insert("running".to_string(), Value::Bool(running));
    }
    Ok(value)
}

async fn handle_delete(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_params("news/delete", params)?;
    let item = state.orchestrator.delete(params.id).await?;
    state.orchestrator.persist_snapshot().await;
    Ok(json!({ "deleted": item.id }))
}

async fn handle_attach_fact_check(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct AttachParams {
        id: ItemId,
        #[serde(flatten)]
        context: FactCheckContext,
    }

    let params: AttachParams = parse_params("news/attachFactCheck", params)?;
    let articles = params.context.articles.len();
    state
        .store
        .lock()
        .await
        .attach_fact_check(params.id, params.context)
        .map_err(AppError::from)?;
    state.orchestrator.persist_snapshot().await;

    info!(item_id = %params.id, articles, "Fact-check context attached");
    Ok(json!({ "id": params.id, "articles": articles }))
}

async fn handle_start(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_params("analysis/start", params)?;
    start(state, params.id).await
}

async fn handle_start_current(state: &SharedState) -> McpResult<Value> {
    let id = state
        .store
        .lock()
        .await
        .enqueue_current()
        .ok_or_else(|| McpError::InvalidRequest {
            message: "No current page article".to_string(),
        })?;
    start(state, id).await
}

async fn start(state: &SharedState, id: ItemId) -> McpResult<Value> {
    // The run is detached; its outcome arrives as notifications.
    let _handle = state.orchestrator.start(id).await?;
    state.orchestrator.persist_snapshot().await;
    status_of(state, id).await
}

async fn handle_retry(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_params("analysis/retry", params)?;
    let _handle = state.orchestrator.retry(params.id).await?;
    state.orchestrator.persist_snapshot().await;
    status_of(state, params.id).await
}

async fn handle_cancel(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_params("analysis/cancel", params)?;
    state.orchestrator.cancel(params.id).await?;
    Ok(json!({ "id": params.id, "cancelled": true }))
}

async fn handle_compare(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CompareParams {
        source_id: ItemId,
        target_id: ItemId,
    }

    let params: CompareParams = parse_params("analysis/compare", params)?;
    let compared = state
        .orchestrator
        .compare(params.source_id, params.target_id)
        .await;
    state.orchestrator.persist_snapshot().await;

    let (id, _handle) = compared?;
    status_of(state, id).await
}

async fn status_of(state: &SharedState, id: ItemId) -> McpResult<Value> {
    let store = state.store.lock().await;
    let item = store.get(id).ok_or_else(|| {
        McpError::from(AppError::from(StoreError::ItemNotFound { id }))
    })?;
    Ok(json!({
        "id": id,
        "status": item.status,
        "targetRounds": item.target_rounds,
        "step": item.current_verification_step,
    }))
}

async fn handle_settings_get(state: &SharedState) -> McpResult<Value> {
    let settings = state.orchestrator.settings().await;
    to_value(SettingsView {
        enabled: settings.enabled,
        depth: settings.depth,
        min_depth: MIN_DEPTH,
        max_depth: MAX_DEPTH,
        target_rounds: settings.target_rounds(),
    })
}

async fn handle_settings_update(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct UpdateParams {
        enabled: Option<bool>,
        depth: Option<u32>,
    }

    let params: UpdateParams = parse_params("settings/update", params)?;
    if params.enabled.is_none() && params.depth.is_none() {
        return Err(invalid("settings/update", "expected enabled or depth"));
    }

    state
        .orchestrator
        .update_settings(params.enabled, params.depth)
        .await;
    handle_settings_get(state).await
}

async fn handle_verdict_get(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: UrlParams = parse_params("verdicts/get", params)?;
    let record = state
        .storage
        .get_verdict(&params.url)
        .await
        .map_err(AppError::from)?;
    match record {
        Some(record) => to_value(record),
        None => Ok(Value::Null),
    }
}

async fn handle_verdict_delete(state: &SharedState, params: Option<Value>) -> McpResult<Value> {
    let params: UrlParams = parse_params("verdicts/delete", params)?;
    let deleted = state
        .storage
        .delete_verdict(&params.url)
        .await
        .map_err(AppError::from)?;
    Ok(json!({ "deleted": deleted }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse params with consistent error handling
fn parse_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> McpResult<T> {
    match params {
        Some(params) => serde_json::from_value(params).map_err(|e| invalid(method, e.to_string())),
        None => Err(invalid(method, "Missing params")),
    }
}

fn invalid(method: &str, message: impl Into<String>) -> McpError {
    McpError::InvalidParameters {
        method: method.to_string(),
        message: message.into(),
    }
}

fn to_value<T: Serialize>(value: T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(McpError::Json)
}
