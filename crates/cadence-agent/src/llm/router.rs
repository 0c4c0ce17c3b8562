//! Model router.
//!
//! Maps each [`Capability`] to a configured model.  Capabilities without an
//! explicit entry fall back to the default model; if neither exists the
//! router reports [`AgentError::ModelUnavailable`], which graph nodes recover
//! from locally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::llm::provider::{Capability, ModelHandle};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a single model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The provider name (e.g. `"anthropic"`, `"openai"`, `"local"`).
    pub provider: String,

    /// The model identifier.
    pub model: String,

    /// Maximum tokens this model may generate per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelConfig {
    /// Create a config for the given provider and model.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Serializable routing table: `default` plus per-capability overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRoutingConfig {
    /// Model used for every capability without an override.
    #[serde(default)]
    pub default: Option<ModelConfig>,
    #[serde(default)]
    pub planning: Option<ModelConfig>,
    #[serde(default)]
    pub execution: Option<ModelConfig>,
    #[serde(default)]
    pub validation: Option<ModelConfig>,
    #[serde(default)]
    pub summarization: Option<ModelConfig>,
    #[serde(default)]
    pub routing: Option<ModelConfig>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes capabilities to configured models.
#[derive(Debug, Clone, Default)]
pub struct ModelRouter {
    default: Option<ModelConfig>,
    by_capability: HashMap<Capability, ModelConfig>,
}

impl ModelRouter {
    /// Create an empty router; every selection fails until models are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router that uses a single model for all capabilities.
    pub fn single(config: ModelConfig) -> Self {
        Self {
            default: Some(config),
            by_capability: HashMap::new(),
        }
    }

    /// Build a router from its serialized form.
    pub fn from_config(config: &ModelRoutingConfig) -> Self {
        let overrides = [
            (Capability::Planning, &config.planning),
            (Capability::Execution, &config.execution),
            (Capability::Validation, &config.validation),
            (Capability::Summarization, &config.summarization),
            (Capability::Routing, &config.routing),
        ];

        Self {
            default: config.default.clone(),
            by_capability: overrides
                .into_iter()
                .filter_map(|(cap, model)| model.clone().map(|m| (cap, m)))
                .collect(),
        }
    }

    /// Builder: route `capability` to `config`.
    pub fn with(mut self, capability: Capability, config: ModelConfig) -> Self {
        self.by_capability.insert(capability, config);
        self
    }

    /// Select the model for a capability, falling back to the default.
    pub fn select(&self, capability: Capability) -> Result<&ModelConfig> {
        self.by_capability
            .get(&capability)
            .or(self.default.as_ref())
            .ok_or_else(|| AgentError::ModelUnavailable {
                capability: capability.to_string(),
            })
    }

    /// Select a model and wrap it in a [`ModelHandle`].
    pub fn handle(&self, capability: Capability) -> Result<ModelHandle> {
        let config = self.select(capability)?;
        tracing::debug!(%capability, model = %config.model, "routed request to model");
        Ok(ModelHandle {
            model: config.model.clone(),
            capability,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_default() {
        let router = ModelRouter::single(ModelConfig::new("local", "general"))
            .with(Capability::Validation, ModelConfig::new("local", "judge"));
        assert_eq!(router.select(Capability::Validation).unwrap().model, "judge");
        assert_eq!(router.select(Capability::Planning).unwrap().model, "general");
    }

    #[test]
    fn missing_model_is_unavailable() {
        let router = ModelRouter::new().with(Capability::Planning, ModelConfig::new("local", "p"));
        let err = router.select(Capability::Execution).unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable { ref capability } if capability == "execution"));
    }

    #[test]
    fn handle_carries_capability() {
        let router = ModelRouter::single(ModelConfig::new("local", "m"));
        let handle = router.handle(Capability::Summarization).unwrap();
        assert_eq!(handle.model, "m");
        assert_eq!(handle.capability, Capability::Summarization);
    }

    #[test]
    fn routing_config_parses_from_toml() {
        let config: ModelRoutingConfig = toml::from_str(
            r#"
            [default]
            provider = "local"
            model = "general"

            [validation]
            provider = "local"
            model = "judge"
            max_tokens = 512
            "#,
        )
        .unwrap();

        let router = ModelRouter::from_config(&config);
        let judge = router.select(Capability::Validation).unwrap();
        assert_eq!(judge.model, "judge");
        assert_eq!(judge.max_tokens, 512);
        assert_eq!(router.select(Capability::Routing).unwrap().max_tokens, 4096);
    }
}
