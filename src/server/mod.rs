//! Server module for the JSON-RPC presentation boundary.
//!
//! This module provides:
//! - JSON-RPC 2.0 server over stdio, with presentation events forwarded
//!   as notifications
//! - Method handlers and routing
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::ModelGateway;
use crate::orchestrator::Orchestrator;
use crate::presentation::Presentation;
use crate::storage::Storage;
use crate::store::SharedStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Tracked news items.
    pub store: SharedStore,
    /// Persisted verdicts and queue snapshots.
    pub storage: Arc<dyn Storage>,
    /// Verification orchestrator driving analysis runs.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: Config,
        store: SharedStore,
        storage: Arc<dyn Storage>,
        gateway: Arc<dyn ModelGateway>,
        presentation: Arc<dyn Presentation>,
    ) -> Self {
        tracing::info!(
            model = %config.gemini.model,
            feedback_enabled = config.verification.enabled,
            depth = config.verification.depth,
            api_key_configured = gateway.is_configured(),
            "AppState initializing"
        );

        let orchestrator = Orchestrator::new(
            store.clone(),
            gateway,
            presentation,
            config.verification.clone(),
        )
        .with_storage(storage.clone());

        Self {
            config,
            store,
            storage,
            orchestrator,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::gateway::ScriptedGateway;

    #[tokio::test]
    async fn test_app_state_new() {
        let (state, _events) = create_test_state(ScriptedGateway::new()).await;

        assert_eq!(state.config.gemini.api_key.as_deref(), Some("test-key"));
        assert!(state.store.lock().await.is_empty());
        assert!(!state.orchestrator.settings().await.enabled);
    }

    #[tokio::test]
    async fn test_app_state_clone_shares_store() {
        let (state, _events) = create_test_state(ScriptedGateway::new()).await;
        let cloned = (*state).clone();

        state
            .store
            .lock()
            .await
            .add("제목", "https://news.example/a", "본문");
        assert_eq!(cloned.store.lock().await.len(), 1);
    }
}
