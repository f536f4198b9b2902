//! LLM Provider implementations.
//!
//! This module contains implementations of the `LlmProvider` trait and the
//! factories the agent driver uses to build them.

pub mod openai;

pub use openai::OpenAIProvider;

use crate::config::LlmSettings;
use crate::error::BridgeError;
use crate::llm::LlmProvider;
use std::sync::Arc;

/// Builds model providers on demand.
///
/// The agent driver asks for a provider whenever it (re)builds its agent, so
/// a factory is where credentials are checked.
pub trait ProviderFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if no usable provider can be
    /// built, most commonly because the credential is missing.
    fn create(&self) -> Result<Arc<dyn LlmProvider>, BridgeError>;
}

/// Factory for [`OpenAIProvider`] driven by [`LlmSettings`].
#[derive(Clone, Debug)]
pub struct OpenAIProviderFactory {
    settings: LlmSettings,
}

impl OpenAIProviderFactory {
    #[must_use]
    pub const fn new(settings: LlmSettings) -> Self {
        Self { settings }
    }
}

impl ProviderFactory for OpenAIProviderFactory {
    fn create(&self) -> Result<Arc<dyn LlmProvider>, BridgeError> {
        if !self.settings.has_credential() {
            return Err(BridgeError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        let provider = OpenAIProvider::from_settings(&self.settings)?;
        log::info!(
            "Created {} provider for model {}",
            provider.provider(),
            provider.model()
        );
        Ok(Arc::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_requires_credential() {
        let factory = OpenAIProviderFactory::new(LlmSettings::default());
        assert!(matches!(
            factory.create(),
            Err(BridgeError::Configuration(msg)) if msg.contains("OPENAI_API_KEY")
        ));

        let empty = OpenAIProviderFactory::new(LlmSettings {
            api_key: Some(String::new()),
            ..LlmSettings::default()
        });
        assert!(empty.create().is_err());
    }

    #[test]
    fn test_factory_builds_configured_model() -> anyhow::Result<()> {
        let factory = OpenAIProviderFactory::new(LlmSettings {
            api_key: Some("sk-test".to_string()),
            model: "qwen-plus".to_string(),
            ..LlmSettings::default()
        });
        let provider = factory.create()?;
        assert_eq!(provider.model(), "qwen-plus");
        Ok(())
    }
}
