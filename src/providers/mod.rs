//! Provider module for SpatialMind
//!
//! This module contains the model-completion abstraction and the
//! implementations for Gemini and Ollama.

pub mod base;
pub mod gemini;
pub mod ollama;

pub use base::{CompletionResponse, Message, Provider, TokenUsage};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;

#[cfg(test)]
pub use base::MockProvider;

use crate::config::{Config, PipelineConfig, ProviderKind};
use crate::error::Result;
use std::sync::Arc;

/// Create a provider instance for a session pipeline
///
/// The pipeline's model override, when present, replaces the configured
/// default model for its backend.
///
/// # Arguments
///
/// * `pipeline` - Per-session pipeline selection
/// * `config` - Process configuration holding backend settings
///
/// # Errors
///
/// Returns error if provider initialization fails (missing API key, HTTP
/// client construction)
///
/// # Examples
///
/// ```
/// use spatialmind::config::{Config, PipelineConfig};
/// use spatialmind::providers::create_provider;
///
/// let pipeline: PipelineConfig = "ollama_text".parse().unwrap();
/// let provider = create_provider(&pipeline, &Config::default()).unwrap();
/// assert_eq!(provider.name(), "ollama");
/// ```
pub fn create_provider(pipeline: &PipelineConfig, config: &Config) -> Result<Arc<dyn Provider>> {
    let timeout = config.pipeline.request_timeout();
    match pipeline.provider {
        ProviderKind::Ollama => {
            let mut ollama_config = config.providers.ollama.clone();
            if let Some(model) = &pipeline.model {
                ollama_config.model = model.clone();
            }
            Ok(Arc::new(OllamaProvider::new(ollama_config, timeout)?))
        }
        ProviderKind::Gemini => {
            let mut gemini_config = config.providers.gemini.clone();
            if let Some(model) = &pipeline.model {
                gemini_config.model = model.clone();
            }
            Ok(Arc::new(GeminiProvider::new(gemini_config, timeout)?))
        }
    }
}

/// Builds providers for new sessions
///
/// The session registry creates one provider per session through this seam
/// so tests can substitute scripted backends.
pub trait ProviderFactory: Send + Sync {
    /// Create the provider for `pipeline`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be initialized
    fn create(&self, pipeline: &PipelineConfig) -> Result<Arc<dyn Provider>>;
}

/// Factory backed by the process configuration
pub struct ConfiguredProviderFactory {
    config: Config,
}

impl ConfiguredProviderFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ProviderFactory for ConfiguredProviderFactory {
    fn create(&self, pipeline: &PipelineConfig) -> Result<Arc<dyn Provider>> {
        create_provider(pipeline, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpatialMindError;

    #[test]
    fn test_create_provider_ollama_default_model() {
        let pipeline: PipelineConfig = "ollama_vision".parse().unwrap();
        let provider = create_provider(&pipeline, &Config::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3.1:8b");
    }

    #[test]
    fn test_create_provider_model_override() {
        let pipeline: PipelineConfig = "ollama_text".parse().unwrap();
        let pipeline = pipeline.with_model(Some("qwen2.5:7b".to_string()));
        let provider = create_provider(&pipeline, &Config::default()).unwrap();
        assert_eq!(provider.model(), "qwen2.5:7b");
    }

    #[test]
    fn test_create_provider_gemini_requires_key() {
        let pipeline: PipelineConfig = "gemini_text".parse().unwrap();
        let err = create_provider(&pipeline, &Config::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<SpatialMindError>(),
            Some(SpatialMindError::Config(_))
        ));
    }

    #[test]
    fn test_create_provider_gemini_with_key() {
        let mut config = Config::default();
        config.providers.gemini.api_key = Some("k".to_string());
        let pipeline: PipelineConfig = "gemini_vision".parse().unwrap();
        let provider = ConfiguredProviderFactory::new(config)
            .create(&pipeline)
            .unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-2.5-pro");
    }
}
