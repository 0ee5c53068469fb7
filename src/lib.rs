//! # Factcheck Verifier
//!
//! Self-feedback verification engine for Korean news fact-checking.
//! Article text scraped by a site parser is sent to Gemini for a
//! truthfulness analysis, and the result is then re-verified by further
//! rounds that see the article, the baseline analysis and every earlier
//! verification.
//!
//! ## Features
//!
//! - **Multi-round verification**: configurable depth (2 to 4) with
//!   cumulative cross-verification prompts
//! - **Streaming**: partial model output forwarded as it arrives
//! - **Cancellation and retry**: per item, resuming at the next round
//! - **Persistence**: verdicts per article URL and the item queue in SQLite
//!
//! ## Architecture
//!
//! ```text
//! Front end ⇄ JSON-RPC (stdio) → Orchestrator → Gemini (HTTP)
//!                                     ↓
//!                               Item store / SQLite
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use factcheck_verifier::{gateway, Config, Orchestrator};
//! use factcheck_verifier::presentation::ChannelPresentation;
//! use factcheck_verifier::store::ItemStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = ItemStore::new().shared();
//!     let id = store.lock().await.add("제목", "https://news.example/a", "본문");
//!     let (presentation, mut events) = ChannelPresentation::new();
//!     let orchestrator = Orchestrator::new(
//!         store,
//!         Arc::new(gateway::from_config(&config)?),
//!         Arc::new(presentation),
//!         config.verification.clone(),
//!     );
//!     orchestrator.start(id).await?.await?;
//!     Ok(())
//! }
//! ```

/// Command-line interface.
pub mod cli;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Model gateway trait, Gemini client, retry decorator and scripted mock.
pub mod gateway;
/// Multi-round verification orchestrator.
pub mod orchestrator;
/// Lenient model response parsing.
pub mod parser;
/// Presentation contract and channel implementation.
pub mod presentation;
/// Prompt builders and user-facing messages.
pub mod prompts;
/// JSON-RPC server over stdio.
pub mod server;
/// SQLite persistence for verdicts and the item queue.
pub mod storage;
/// In-memory item store.
pub mod store;
/// Structured verdict model.
pub mod verdict;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::Orchestrator;
pub use server::{AppState, McpServer, SharedState};
