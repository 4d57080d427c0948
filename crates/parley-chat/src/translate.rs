//! English/Roman Urdu translation with fallback to the original text.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::types::Language;

/// Errors reported by a translation backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslationError {
    #[error("translation backend unavailable: {0}")]
    Unavailable(String),
    #[error("translation request failed: {0}")]
    Request(String),
    #[error("translation backend returned no text")]
    Empty,
}

/// Translates text into one of the two conversation languages.
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, text: &str, target: Language) -> Result<String, TranslationError>;
}

/// Result of a translation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub text: String,
    /// False when the original text was returned unchanged.
    pub translated: bool,
}

/// Never-failing translation front end.
///
/// Backend errors are logged and answered with the original text.
#[derive(Clone, Default)]
pub struct TranslationService {
    translator: Option<Arc<dyn Translator>>,
}

impl TranslationService {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self {
            translator: Some(translator),
        }
    }

    /// A service without a backend: every request falls back.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.translator.is_some()
    }

    pub async fn translate(&self, text: &str, target: Language) -> TranslationOutcome {
        let fallback = || TranslationOutcome {
            text: text.to_string(),
            translated: false,
        };
        if text.trim().is_empty() {
            return fallback();
        }
        let Some(translator) = self.translator.as_ref() else {
            debug!("No translation backend configured, returning original text");
            return fallback();
        };

        match translator.translate(text, target).await {
            Ok(translated) if !translated.trim().is_empty() => TranslationOutcome {
                text: translated,
                translated: true,
            },
            Ok(_) => {
                warn!(backend = translator.name(), error = %TranslationError::Empty, "Translation fell back to original text");
                fallback()
            }
            Err(e) => {
                warn!(backend = translator.name(), error = %e, "Translation fell back to original text");
                fallback()
            }
        }
    }
}

impl std::fmt::Debug for TranslationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationService")
            .field("backend", &self.translator.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Translator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn translate(&self, _text: &str, _target: Language) -> Result<String, TranslationError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Translator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn translate(&self, _text: &str, _target: Language) -> Result<String, TranslationError> {
            Err(TranslationError::Request("HTTP 503".to_string()))
        }
    }

    #[tokio::test]
    async fn test_successful_translation() {
        let service = TranslationService::new(Arc::new(Fixed("Aap kaise hain?")));
        let outcome = service.translate("How are you?", Language::RomanUrdu).await;
        assert_eq!(
            outcome,
            TranslationOutcome {
                text: "Aap kaise hain?".to_string(),
                translated: true
            }
        );
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let service = TranslationService::new(Arc::new(Broken));
        let outcome = service.translate("How are you?", Language::RomanUrdu).await;
        assert_eq!(outcome.text, "How are you?");
        assert!(!outcome.translated);
    }

    #[tokio::test]
    async fn test_empty_translation_falls_back() {
        let service = TranslationService::new(Arc::new(Fixed("   ")));
        let outcome = service.translate("Shukriya", Language::English).await;
        assert_eq!(outcome.text, "Shukriya");
        assert!(!outcome.translated);
    }

    #[tokio::test]
    async fn test_disabled_service_returns_original() {
        let service = TranslationService::disabled();
        assert!(!service.is_enabled());
        let outcome = service.translate("Hello", Language::RomanUrdu).await;
        assert_eq!(outcome.text, "Hello");
        assert!(!outcome.translated);
    }
}
