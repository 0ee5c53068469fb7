use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Smallest accepted feedback depth.
pub const MIN_DEPTH: u32 = 2;
/// Largest accepted feedback depth.
pub const MAX_DEPTH: u32 = 4;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub verification: VerificationConfig,
}

/// Gemini API configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Missing keys are reported per analysis, not at startup.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    /// Attempts per round, the first one included.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Self-feedback loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub depth: u32,
    pub progress_interval_ms: u64,
    /// Wall-clock budget for a single-round run.
    pub analysis_timeout_ms: u64,
    /// Wall-clock budget for a multi-round run.
    pub verification_timeout_ms: u64,
    pub streaming: bool,
}

/// Clamp a requested depth into the accepted range.
pub fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(MIN_DEPTH, MAX_DEPTH)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let gemini = GeminiConfig {
            api_key: env::var("GEMINI_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| GeminiConfig::DEFAULT_BASE_URL.to_string()),
            model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| GeminiConfig::DEFAULT_MODEL.to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/factcheck.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 60_000)?,
            max_attempts: parse_var::<u32>("MAX_ATTEMPTS", 3)?.max(1),
            retry_delay_ms: parse_var("RETRY_DELAY_MS", 1000)?,
        };

        let defaults = VerificationConfig::default();
        let verification = VerificationConfig {
            enabled: parse_bool_var("FEEDBACK_ENABLED", defaults.enabled)?,
            depth: clamp_depth(parse_var("FEEDBACK_DEPTH", defaults.depth)?),
            progress_interval_ms: parse_var("PROGRESS_INTERVAL_MS", defaults.progress_interval_ms)?,
            analysis_timeout_ms: parse_var("ANALYSIS_TIMEOUT_MS", defaults.analysis_timeout_ms)?,
            verification_timeout_ms: parse_var(
                "VERIFICATION_TIMEOUT_MS",
                defaults.verification_timeout_ms,
            )?,
            streaming: parse_bool_var("STREAMING", defaults.streaming)?,
        };

        Ok(Config {
            gemini,
            database,
            logging,
            request,
            verification,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: {}", name, raw),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_var(name: &str, default: bool) -> Result<bool, AppError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config {
                message: format!("{} must be a boolean, got: {}", name, raw),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl GeminiConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depth: 3,
            progress_interval_ms: 400,
            analysis_timeout_ms: 5 * 60 * 1000,
            verification_timeout_ms: 10 * 60 * 1000,
            streaming: true,
        }
    }
}

impl VerificationConfig {
    /// Number of rounds an item started under these settings must complete.
    pub fn target_rounds(&self) -> u32 {
        if self.enabled {
            clamp_depth(self.depth)
        } else {
            1
        }
    }

    /// Wall-clock budget for a run of `target_rounds` rounds.
    pub fn timeout_for(&self, target_rounds: u32) -> std::time::Duration {
        let ms = if target_rounds > 1 {
            self.verification_timeout_ms
        } else {
            self.analysis_timeout_ms
        };
        std::time::Duration::from_millis(ms)
    }
}
