mod compaction;
mod llm;
mod retry;
mod server;
mod session;
mod tools;

pub use compaction::*;
pub use llm::*;
pub use retry::*;
pub use server::*;
pub use session::*;
pub use tools::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load the config from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.server.apply_env();
        Ok(config)
    }

    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for pc in &self.llm.providers {
            if pc.id.is_empty() {
                issues.push(ConfigIssue::error("llm.providers.id", "must not be empty"));
            }
            if !seen.insert(pc.id.clone()) {
                issues.push(ConfigIssue::error(
                    "llm.providers.id",
                    format!("duplicate provider id '{}'", pc.id),
                ));
            }
            if pc.base_url.is_empty() {
                issues.push(ConfigIssue::error(
                    "llm.providers.base_url",
                    format!("provider '{}' has no base_url", pc.id),
                ));
            }
            if pc.models.is_empty() && pc.default_model.is_none() {
                issues.push(ConfigIssue::warning(
                    "llm.providers.models",
                    format!("provider '{}' lists no models", pc.id),
                ));
            }
        }

        if let Some(default) = &self.llm.default_provider {
            if !self.llm.providers.iter().any(|p| &p.id == default) {
                issues.push(ConfigIssue::error(
                    "llm.default_provider",
                    format!("'{default}' is not a configured provider"),
                ));
            }
        }

        if self.compaction.reserve_tokens == 0 {
            issues.push(ConfigIssue::error(
                "compaction.reserve_tokens",
                "must be greater than zero",
            ));
        }

        if self.retry.max_retries > 10 {
            issues.push(ConfigIssue::warning(
                "retry.max_retries",
                "values above 10 produce multi-minute backoffs",
            ));
        }

        if self.server.max_body_bytes < 4096 {
            issues.push(ConfigIssue::warning(
                "server.max_body_bytes",
                "very small body caps will reject ordinary prompts",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_valid() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn duplicate_provider_ids_are_errors() {
        let config: Config = toml::from_str(
            r#"
            [[llm.providers]]
            id = "a"
            base_url = "http://x"
            api_key_env = "K"

            [[llm.providers]]
            id = "a"
            base_url = "http://y"
            api_key_env = "K"
            "#,
        )
        .unwrap();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("duplicate")));
    }

    #[test]
    fn unknown_default_provider_is_an_error() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            default_provider = "missing"
            "#,
        )
        .unwrap();
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn toml_defaults_fill_in() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 19000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.heartbeat_secs, 30);
        assert!(config.compaction.auto);
        assert_eq!(config.retry.max_retries, 3);
    }
}
