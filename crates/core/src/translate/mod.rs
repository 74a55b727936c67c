//! The translation port.
//! Everything above this module treats the provider as an opaque call that
//! may fail, be slow or signal rate limiting.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod google;

/// Failure reported by a provider for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// True when the provider asked us to slow down.
    pub rate_limited: bool,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            rate_limited: false,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            rate_limited: true,
            message: message.into(),
        }
    }
}

/// Translates one piece of text into the target language.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Issue a single remote translation call. No retries happen here.
    async fn translate_once(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
impl<T: Translator + ?Sized> Translator for std::sync::Arc<T> {
    async fn translate_once(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        (**self).translate_once(text, target_language).await
    }
}
