use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Configured provider endpoints.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Provider used when a model spec carries no `provider/` prefix.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Default reasoning effort requested from the model.
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id, also the `provider/` prefix in model specs.
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Endpoint base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Models this provider serves, in cycling order.
    #[serde(default)]
    pub models: Vec<String>,
    /// Model used when a request names none.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Context window of the served models (tokens).
    #[serde(default = "d_context_window")]
    pub context_window: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any endpoint following the OpenAI chat completions contract.
    #[default]
    OpenaiCompat,
}

/// Reasoning effort requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    #[default]
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub const ALL: [ThinkingLevel; 4] = [
        ThinkingLevel::Off,
        ThinkingLevel::Low,
        ThinkingLevel::Medium,
        ThinkingLevel::High,
    ];

    /// The next level in cycling order, wrapping around.
    pub fn next(self) -> Self {
        match self {
            ThinkingLevel::Off => ThinkingLevel::Low,
            ThinkingLevel::Low => ThinkingLevel::Medium,
            ThinkingLevel::Medium => ThinkingLevel::High,
            ThinkingLevel::High => ThinkingLevel::Off,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_context_window() -> u64 {
    128_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_level_cycles_through_all() {
        let mut level = ThinkingLevel::Off;
        for expected in [
            ThinkingLevel::Low,
            ThinkingLevel::Medium,
            ThinkingLevel::High,
            ThinkingLevel::Off,
        ] {
            level = level.next();
            assert_eq!(level, expected);
        }
    }

    #[test]
    fn provider_config_defaults() {
        let cfg: ProviderConfig = toml::from_str(
            r#"
            id = "local"
            base_url = "http://localhost:8080/v1"
            api_key_env = "LOCAL_API_KEY"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.kind, ProviderKind::OpenaiCompat);
        assert_eq!(cfg.context_window, 128_000);
        assert!(cfg.models.is_empty());
    }
}
