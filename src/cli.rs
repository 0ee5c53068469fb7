//! Command-line interface.
//!
//! `serve` (the default) runs the JSON-RPC server on stdio. The other
//! subcommands are one-shot operations against the configured database.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{clamp_depth, Config};
use crate::gateway;
use crate::orchestrator::Orchestrator;
use crate::presentation::{ChannelPresentation, PresentationEvent};
use crate::storage::Storage;
use crate::store::{ItemStatus, ItemStore, NewsItem};

/// Self-feedback fact-check verifier.
#[derive(Parser, Debug, Clone)]
#[command(name = "factcheck-verifier", version, about)]
pub struct Cli {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable multi-round self-feedback verification
    #[arg(long, global = true)]
    pub feedback: bool,

    /// Verification depth, 2 to 4 (implies --feedback)
    #[arg(long, global = true)]
    pub depth: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve JSON-RPC on stdin/stdout
    Serve,

    /// Analyze one article and print the final item as JSON
    Analyze {
        /// Article title
        #[arg(long)]
        title: String,

        /// Article URL
        #[arg(long)]
        url: String,

        /// File holding the article body
        #[arg(long)]
        content_file: PathBuf,

        /// Wait for complete responses instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Show the saved verdict for an article URL
    Verdict {
        /// Article URL
        url: String,
    },

    /// List the persisted news items
    Items,
}

impl Cli {
    /// Apply command-line overrides on top of the environment config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.database {
            config.database.path = path.clone();
        }
        if self.feedback {
            config.verification.enabled = true;
        }
        if let Some(depth) = self.depth {
            config.verification.enabled = true;
            config.verification.depth = clamp_depth(depth);
        }
        if let Some(Commands::Analyze { no_stream: true, .. }) = &self.command {
            config.verification.streaming = false;
        }
    }

    /// The subcommand to run; `serve` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a one-shot CLI command.
pub async fn execute_command(
    command: Commands,
    config: &Config,
    storage: Arc<dyn Storage>,
) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a one-shot command"),
        Commands::Analyze {
            title,
            url,
            content_file,
            ..
        } => execute_analyze(config, storage, title, url, content_file).await,
        Commands::Verdict { url } => execute_verdict(storage.as_ref(), &url).await,
        Commands::Items => execute_items(storage.as_ref()).await,
    }
}

/// Execute analyze command.
async fn execute_analyze(
    config: &Config,
    storage: Arc<dyn Storage>,
    title: String,
    url: String,
    content_file: PathBuf,
) -> CliResult {
    let content = match tokio::fs::read_to_string(&content_file).await {
        Ok(content) => content,
        Err(e) => {
            return CliResult::error(format!(
                "Failed to read {}: {}",
                content_file.display(),
                e
            ))
        }
    };

    let gateway = match gateway::from_config(config) {
        Ok(gateway) => gateway,
        Err(e) => return CliResult::error(format!("Failed to create Gemini client: {}", e)),
    };

    let store = ItemStore::new().shared();
    let id = store.lock().await.add(title, url, content);
    let (presentation, mut events) = ChannelPresentation::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(presentation),
        config.verification.clone(),
    )
    .with_verdict_storage(storage);

    let handle = match orchestrator.start(id).await {
        Ok(handle) => handle,
        Err(e) => return CliResult::error(format!("Failed to start analysis: {}", e)),
    };

    let mut shown = 0;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    PresentationEvent::Progress { message, .. } => {
                        eprintln!("{}", message);
                        shown = 0;
                    }
                    PresentationEvent::RoundAdvance { step, total, .. } => {
                        eprintln!("--- {}/{} ---", step, total);
                    }
                    PresentationEvent::Partial { text, .. } => {
                        if let Some(fresh) = text.get(shown..) {
                            eprint!("{}", fresh);
                        }
                        shown = text.len();
                    }
                    PresentationEvent::Completed { .. } | PresentationEvent::Failed { .. } => {}
                }
                if event.is_terminal() {
                    eprintln!();
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = orchestrator.cancel(id).await {
                    tracing::debug!(error = %e, "Nothing to cancel");
                }
            }
        }
    }

    if let Err(e) = handle.await {
        return CliResult::error(format!("Analysis task failed: {}", e));
    }

    let item = match store.lock().await.require(id) {
        Ok(item) => item,
        Err(e) => return CliResult::error(e.to_string()),
    };
    let json = serde_json::to_string_pretty(&item).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e));

    match item.status {
        ItemStatus::Completed => CliResult::success(json),
        _ => CliResult {
            exit_code: 1,
            message: json,
        },
    }
}

/// Execute verdict command.
async fn execute_verdict(storage: &dyn Storage, url: &str) -> CliResult {
    match storage.get_verdict(url).await {
        Ok(Some(record)) => match serde_json::to_string_pretty(&record) {
            Ok(json) => CliResult::success(json),
            Err(e) => CliResult::error(format!("Failed to serialize verdict: {}", e)),
        },
        Ok(None) => CliResult::success(format!("No saved verdict for {}", url)),
        Err(e) => CliResult::error(format!("Failed to load verdict: {}", e)),
    }
}

/// Execute items command.
async fn execute_items(storage: &dyn Storage) -> CliResult {
    let snapshot = match storage.load_snapshot().await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return CliResult::success("No saved items"),
        Err(e) => return CliResult::error(format!("Failed to load items: {}", e)),
    };

    if snapshot.items.is_empty() {
        return CliResult::success("No saved items");
    }

    let mut output = format!("News items ({}):\n", snapshot.items.len());
    for item in &snapshot.items {
        output.push_str(&format_item(item));
        output.push('\n');
    }
    CliResult::success(output)
}

fn format_item(item: &NewsItem) -> String {
    let label = crate::orchestrator::displayed_result(item)
        .map(|result| result.label().to_string())
        .unwrap_or_else(|| "-".to_string());
    let target = item
        .target_rounds
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "  #{:<4} {:<10} {}/{}  {:<8} {}",
        item.id,
        item.status.to_string(),
        item.current_verification_step,
        target,
        label,
        item.title
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, VerdictRecord};

    #[test]
    fn test_parse_defaults_to_serve() {
        let cli = Cli::try_parse_from(["factcheck-verifier"]).unwrap();
        assert_eq!(cli.command(), Commands::Serve);
        assert!(!cli.feedback);
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "factcheck-verifier",
            "analyze",
            "--title",
            "제목",
            "--url",
            "https://news.example/a",
            "--content-file",
            "article.txt",
            "--depth",
            "9",
            "--no-stream",
        ])
        .unwrap();

        let mut config = crate::server::test_support::create_test_config();
        cli.apply(&mut config);
        assert!(config.verification.enabled);
        assert_eq!(config.verification.depth, 4);
        assert!(!config.verification.streaming);
        assert!(matches!(cli.command(), Commands::Analyze { .. }));
    }

    #[test]
    fn test_database_override() {
        let cli =
            Cli::try_parse_from(["factcheck-verifier", "--database", "/tmp/x.db", "items"]).unwrap();
        let mut config = crate::server::test_support::create_test_config();
        cli.apply(&mut config);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert!(!config.verification.enabled);
    }

    #[tokio::test]
    async fn test_verdict_command() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        storage
            .save_verdict(&VerdictRecord::new("https://news.example/a", "일부 사실"))
            .await
            .unwrap();

        let result = execute_verdict(&storage, "https://news.example/a?x=1").await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("일부 사실"));

        let result = execute_verdict(&storage, "https://news.example/b").await;
        assert!(result.message.starts_with("No saved verdict"));
    }

    #[tokio::test]
    async fn test_items_command() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        assert_eq!(execute_items(&storage).await.message, "No saved items");

        let mut store = ItemStore::new();
        store.add("첫 기사", "https://news.example/a", "본문");
        storage.save_snapshot(&store.snapshot()).await.unwrap();

        let result = execute_items(&storage).await;
        assert!(result.message.contains("News items (1)"));
        assert!(result.message.contains("첫 기사"));
        assert!(result.message.contains("pending"));
    }

    #[tokio::test]
    async fn test_analyze_missing_file() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let config = crate::server::test_support::create_test_config();
        let result = execute_command(
            Commands::Analyze {
                title: "제목".to_string(),
                url: "https://news.example/a".to_string(),
                content_file: PathBuf::from("/nonexistent/article.txt"),
                no_stream: false,
            },
            &config,
            Arc::new(storage),
        )
        .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.message.contains("Failed to read"));
    }

    #[tokio::test]
    async fn test_analyze_keeps_saved_queue() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "parts": [{ "text": "[{\"output\": {\"진위\": \"사실\", \"근거\": \"출처 명확\"}}]" }],
                        "role": "model"
                    }
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let mut queued = ItemStore::new();
        queued.add("첫 기사", "https://news.example/a", "본문 A");
        queued.add("둘째 기사", "https://news.example/b", "본문 B");
        queued.add("셋째 기사", "https://news.example/c", "본문 C");
        let seeded = queued.snapshot();
        storage.save_snapshot(&seeded).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let content_file = dir.path().join("article.txt");
        std::fs::write(&content_file, "새 기사 본문").unwrap();

        let mut config = crate::server::test_support::create_test_config();
        config.gemini.base_url = mock_server.uri();
        config.verification.streaming = false;

        let result = execute_command(
            Commands::Analyze {
                title: "새 기사".to_string(),
                url: "https://news.example/new".to_string(),
                content_file,
                no_stream: true,
            },
            &config,
            storage.clone(),
        )
        .await;
        assert_eq!(result.exit_code, 0, "{}", result.message);

        let snapshot = storage.load_snapshot().await.unwrap().unwrap();
        let titles: Vec<_> = snapshot.items.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["첫 기사", "둘째 기사", "셋째 기사"]);
        assert_eq!(snapshot.next_id, seeded.next_id);

        let verdict = storage
            .get_verdict("https://news.example/new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.verdict, "사실");
    }
}
