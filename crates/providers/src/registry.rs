//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. Providers
//! that fail to initialize are recorded (with secrets masked) instead of
//! aborting startup, so readiness endpoints can report the cause.

use std::collections::HashMap;
use std::sync::Arc;

use coda_domain::config::{LlmConfig, ProviderKind};
use coda_domain::error::Result;

use crate::auth::CredentialCache;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully-qualified model reference: `provider/model`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl ModelSpec {
    /// Parse `provider/model`; a bare name resolves against `fallback`.
    pub fn parse(spec: &str, fallback_provider: Option<&str>) -> Option<ModelSpec> {
        match spec.split_once('/') {
            Some((provider, model)) => Some(ModelSpec {
                provider: provider.to_owned(),
                model: model.to_owned(),
            }),
            None => fallback_provider.map(|p| ModelSpec {
                provider: p.to_owned(),
                model: spec.to_owned(),
            }),
        }
    }
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Provider ids in configuration order (cycling order).
    order: Vec<String>,
    default_provider: Option<String>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    pub fn from_config(config: &LlmConfig, creds: Arc<CredentialCache>) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut order = Vec::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            let result = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, creds.clone())
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    order.push(pc.id.clone());
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        error: safe_error,
                    });
                }
            }
        }

        Ok(Self {
            providers,
            order,
            default_provider: config.default_provider.clone(),
            init_errors,
        })
    }

    /// Build a registry from already-constructed providers (tests, embedded
    /// hosts).
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for p in providers {
            order.push(p.provider_id().to_owned());
            map.insert(p.provider_id().to_owned(), p);
        }
        Self {
            providers: map,
            order,
            default_provider: None,
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    /// The default provider: configured default, else first configured.
    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        if let Some(id) = &self.default_provider {
            if let Some(p) = self.providers.get(id) {
                return Some(p.clone());
            }
        }
        self.order.first().and_then(|id| self.get(id))
    }

    /// Resolve a `provider/model` spec (or bare model name against the
    /// default provider) to a provider handle and model name.
    pub fn resolve(&self, spec: &str) -> Option<(Arc<dyn LlmProvider>, String)> {
        let fallback = self
            .default_provider
            .as_deref()
            .or_else(|| self.order.first().map(String::as_str));
        let parsed = ModelSpec::parse(spec, fallback)?;
        let provider = self.get(&parsed.provider)?;
        Some((provider, parsed.model))
    }

    /// Every available model, in provider configuration order.
    pub fn available_models(&self) -> Vec<ModelSpec> {
        let mut specs = Vec::new();
        for id in &self.order {
            let Some(provider) = self.providers.get(id) else {
                continue;
            };
            let models = provider.models();
            if models.is_empty() {
                specs.push(ModelSpec {
                    provider: id.clone(),
                    model: provider.default_model().to_owned(),
                });
            } else {
                for m in models {
                    specs.push(ModelSpec {
                        provider: id.clone(),
                        model: m.clone(),
                    });
                }
            }
        }
        specs
    }

    /// The model after `current` in cycling order, wrapping around.
    /// `None` for `current` yields the first available model.
    pub fn cycle_model(&self, current: Option<&ModelSpec>) -> Option<ModelSpec> {
        let all = self.available_models();
        if all.is_empty() {
            return None;
        }
        let next_index = match current {
            Some(cur) => all
                .iter()
                .position(|m| m == cur)
                .map(|i| (i + 1) % all.len())
                .unwrap_or(0),
            None => 0,
        };
        all.into_iter().nth(next_index)
    }
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never reach logs or readiness endpoints.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}
