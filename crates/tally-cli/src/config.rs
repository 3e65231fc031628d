//! Configuration file support

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Configuration for tally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// OpenAI-compatible endpoint, e.g. a local server
    pub base_url: Option<String>,
    /// Iteration budget per question
    pub max_iterations: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
    /// Client-side request rate limit
    pub rate_limit: Option<RateLimitSettings>,
    /// Human-readable source for each table, keyed by table name
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    1
}

impl From<RateLimitSettings> for tally_agent::RateLimitConfig {
    fn from(settings: RateLimitSettings) -> Self {
        Self {
            requests_per_minute: settings.requests_per_minute,
            burst: settings.burst,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TALLY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(tally_agent::agent::DEFAULT_MODEL.to_string()),
            max_iterations: Some(tally_agent::MAX_ITERATIONS),
            temperature: Some(0.1),
            ..Config::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// API key from the config file, falling back to `OPENAI_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.api_keys
            .openai
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tally configuration file
# Place at ~/.config/tally/config.toml (Linux/Mac) or %APPDATA%\tally\config.toml (Windows)

# Default model to use
model = "gpt-4o-mini"

# OpenAI-compatible endpoint (optional)
# base_url = "http://localhost:11434/v1"

# Iteration budget per question
max_iterations = 50

# Sampling temperature
temperature = 0.1

# API keys (optional - can also use the OPENAI_API_KEY environment variable)
[api_keys]
# openai = "sk-..."

# Client-side rate limit (optional)
# [rate_limit]
# requests_per_minute = 60
# burst = 5

# Where each table came from, shown to the model next to the table name
[labels]
# t_1 = "sales_2024.xlsx / Q1"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.max_iterations, Some(50));
        assert!(config.rate_limit.is_none());
        assert!(config.labels.is_empty());
    }

    #[test]
    fn test_labels_and_rate_limit() {
        let config = Config::parse(
            r#"
            [rate_limit]
            requests_per_minute = 30

            [labels]
            t_1 = "orders.xlsx / Sheet1"
            "#,
        );
        assert_eq!(config.labels["t_1"], "orders.xlsx / Sheet1");
        let limit: tally_agent::RateLimitConfig = config.rate_limit.unwrap().into();
        assert_eq!(limit.requests_per_minute, 30);
        assert_eq!(limit.burst, 1);
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let config = Config::parse("model = [");
        assert!(config.model.is_none());
    }

    #[test]
    fn test_config_key_wins_over_blank() {
        let config = Config {
            api_keys: ApiKeys {
                openai: Some("sk-file".into()),
            },
            ..Config::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-file"));
    }
}
