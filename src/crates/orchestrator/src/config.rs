//! Server configuration from the environment.

use std::time::Duration;

/// Env-driven server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// SQLite connection string.
    pub database_url: String,
    /// Gemini API key; absent means the server refuses to start.
    pub gemini_api_key: Option<String>,
    /// Gemini API base URL.
    pub gemini_base_url: String,
    /// Model identifier.
    pub gemini_model: String,
    /// Judge0 endpoint.
    pub judge0_api_url: String,
    /// Judge0 auth token.
    pub judge0_api_key: Option<String>,
    /// Rate-limit window budget for LLM calls.
    pub rate_limit_max_calls: usize,
    /// Rate-limit window length.
    pub rate_limit_period: Duration,
    /// Timeout for chat-path requests.
    pub chat_timeout: Duration,
    /// Timeout for submission requests.
    pub submit_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            database_url: "sqlite:evaluator.db?mode=rwc".to_string(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            judge0_api_url: "http://localhost:2358".to_string(),
            judge0_api_key: None,
            rate_limit_max_calls: 15,
            rate_limit_period: Duration::from_secs(60),
            chat_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(120),
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the environment, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            database_url: env_or("DATABASE_URL", &defaults.database_url),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gemini_base_url: env_or("GEMINI_BASE_URL", &defaults.gemini_base_url),
            gemini_model: env_or("GEMINI_MODEL", &defaults.gemini_model),
            judge0_api_url: env_or("JUDGE0_API_URL", &defaults.judge0_api_url),
            judge0_api_key: std::env::var("JUDGE0_API_KEY").ok(),
            rate_limit_max_calls: env_parse(
                "LLM_RATE_LIMIT_MAX_CALLS",
                defaults.rate_limit_max_calls,
            ),
            rate_limit_period: Duration::from_secs(env_parse("LLM_RATE_LIMIT_PERIOD_SECS", 60)),
            chat_timeout: Duration::from_secs(env_parse("CHAT_TIMEOUT_SECS", 60)),
            submit_timeout: Duration::from_secs(env_parse("SUBMIT_TIMEOUT_SECS", 120)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
