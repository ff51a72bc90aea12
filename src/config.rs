// Application configuration, loaded from environment variables and CLI flags.

use std::time::Duration;

use crate::battle::DEFAULT_MAX_PLAYER_HEALTH;
use crate::healing::HealingStrategy;
use crate::llm::openai::{DEFAULT_BASE_URL, DEFAULT_JUDGE_MODEL, DEFAULT_MODERATION_MODEL};
use crate::moderation::ModerationPolicy;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Key for the OpenAI-compatible API. Without it neither the judge nor
    /// moderation is reachable.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub judge_model: String,
    pub moderation_model: String,
    /// Per-request timeout for external calls.
    pub external_timeout: Duration,
    pub moderation_policy: ModerationPolicy,
    pub healing_strategy: HealingStrategy,
    pub max_player_health: i32,
    /// Exposes the administrative unlock endpoint.
    pub debug_tools: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:prompt_wizard.db?mode=rwc".to_string(),
            port: 3001,
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            moderation_model: DEFAULT_MODERATION_MODEL.to_string(),
            external_timeout: Duration::from_secs(20),
            moderation_policy: ModerationPolicy::FailOpen,
            healing_strategy: HealingStrategy::Auto,
            max_player_health: DEFAULT_MAX_PLAYER_HEALTH,
            debug_tools: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:prompt_wizard.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3001)
    /// - `OPENAI_API_KEY` - API key; unset leaves external services unconfigured
    /// - `OPENAI_BASE_URL` - API base (default: `https://api.openai.com/v1`)
    /// - `JUDGE_MODEL` / `MODERATION_MODEL` - model names
    /// - `EXTERNAL_TIMEOUT_SECS` - external call timeout (default: 20)
    /// - `MODERATION_POLICY` - `fail_open` or `fail_closed`
    /// - `HEALING_CLASSIFIER` - `auto` or `keyword`
    /// - `MAX_PLAYER_HEALTH` - starting player health (default: 100)
    /// - `PROMPT_WIZARD_DEBUG_TOOLS` - `true` exposes the unlock-all endpoint
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--debug-tools` - Same as `PROMPT_WIZARD_DEBUG_TOOLS=true`
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI args and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let database_url = env("DATABASE_URL").unwrap_or(defaults.database_url);

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(defaults.port);

        let openai_api_key = env("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());

        let external_timeout = env("EXTERNAL_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.external_timeout);

        let moderation_policy = match env("MODERATION_POLICY") {
            Some(v) => ModerationPolicy::from_str_name(&v).unwrap_or_else(|| {
                tracing::warn!("Unknown MODERATION_POLICY {v:?}, using fail_open");
                defaults.moderation_policy
            }),
            None => defaults.moderation_policy,
        };

        let healing_strategy = match env("HEALING_CLASSIFIER") {
            Some(v) => HealingStrategy::from_str_name(&v).unwrap_or_else(|| {
                tracing::warn!("Unknown HEALING_CLASSIFIER {v:?}, using auto");
                defaults.healing_strategy
            }),
            None => defaults.healing_strategy,
        };

        let max_player_health = env("MAX_PLAYER_HEALTH")
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(defaults.max_player_health);

        let debug_tools = args.iter().any(|a| a == "--debug-tools")
            || env("PROMPT_WIZARD_DEBUG_TOOLS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        Config {
            database_url,
            port,
            openai_api_key,
            openai_base_url: env("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            judge_model: env("JUDGE_MODEL").unwrap_or(defaults.judge_model),
            moderation_model: env("MODERATION_MODEL").unwrap_or(defaults.moderation_model),
            external_timeout,
            moderation_policy,
            healing_strategy,
            max_player_health,
            debug_tools,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &[&str], vars: &[(&str, &str)]) -> Config {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_sources(&args, |k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&["prompt-wizard-backend"], &[]);
        assert_eq!(config.port, 3001);
        assert_eq!(config.database_url, "sqlite:prompt_wizard.db?mode=rwc");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.judge_model, "gpt-5-nano");
        assert_eq!(config.moderation_model, "omni-moderation-latest");
        assert_eq!(config.external_timeout, Duration::from_secs(20));
        assert_eq!(config.moderation_policy, ModerationPolicy::FailOpen);
        assert_eq!(config.healing_strategy, HealingStrategy::Auto);
        assert_eq!(config.max_player_health, 100);
        assert!(!config.debug_tools);
    }

    #[test]
    fn test_cli_port_overrides_env() {
        let config = load(&["bin", "--port", "8080"], &[("PORT", "9000")]);
        assert_eq!(config.port, 8080);
        let config = load(&["bin"], &[("PORT", "9000")]);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_env_values() {
        let config = load(
            &["bin"],
            &[
                ("OPENAI_API_KEY", "sk-test"),
                ("MODERATION_POLICY", "fail_closed"),
                ("HEALING_CLASSIFIER", "keyword"),
                ("EXTERNAL_TIMEOUT_SECS", "5"),
                ("MAX_PLAYER_HEALTH", "120"),
                ("PROMPT_WIZARD_DEBUG_TOOLS", "1"),
            ],
        );
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.moderation_policy, ModerationPolicy::FailClosed);
        assert_eq!(config.healing_strategy, HealingStrategy::Keyword);
        assert_eq!(config.external_timeout, Duration::from_secs(5));
        assert_eq!(config.max_player_health, 120);
        assert!(config.debug_tools);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(
            &["bin", "--debug-tools"],
            &[
                ("OPENAI_API_KEY", "  "),
                ("MODERATION_POLICY", "strict"),
                ("MAX_PLAYER_HEALTH", "-5"),
                ("EXTERNAL_TIMEOUT_SECS", "0"),
            ],
        );
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.moderation_policy, ModerationPolicy::FailOpen);
        assert_eq!(config.max_player_health, 100);
        assert_eq!(config.external_timeout, Duration::from_secs(20));
        assert!(config.debug_tools);
    }
}
