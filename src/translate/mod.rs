// Translation layer
//
// This module hides translation backends behind one trait and adds the
// session cache on top of it:
// - Youdao: licensed translation API signed with app key/secret
// - Llm: OpenAI-compatible chat completions
//
// To add a new backend:
// 1. Implement TranslationClient (honour the cancellation token)
// 2. Add a variant to config::Provider
// 3. Map it in ClientFactory::create_client

pub mod cache;
pub mod format;
pub mod llm;
pub mod youdao;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use cache::TranslationCache;
pub use format::format_translation;
use crate::classify::LanguageClassifier;
use crate::config::{Provider, TranslateConfig};
use crate::error::{GraphlateError, Result};

/// A translation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Translate `text` from `from` (or `auto`) into `to`.
    /// Implementations return `GraphlateError::Cancelled` once `cancel` fires.
    async fn translate(
        &self,
        text: &str,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Factory for translation clients
pub struct ClientFactory;

impl ClientFactory {
    /// Create the client selected by `config.provider`
    pub fn create_client(config: &TranslateConfig) -> Result<Arc<dyn TranslationClient>> {
        match config.provider {
            Provider::Youdao => Ok(Arc::new(youdao::YoudaoClient::new(&config.youdao)?)),
            Provider::Llm => Ok(Arc::new(llm::LlmClient::new(&config.llm)?)),
        }
    }
}

/// Result of one cached translation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Translated { text: String, from_cache: bool },
    /// The caller must keep using `original`.
    Failed { original: String, error: String },
}

impl TranslationOutcome {
    /// Text to use: the translation, or the original on failure.
    pub fn text(&self) -> &str {
        match self {
            TranslationOutcome::Translated { text, .. } => text,
            TranslationOutcome::Failed { original, .. } => original,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TranslationOutcome::Translated { .. })
    }

    pub fn from_cache(&self) -> bool {
        matches!(self, TranslationOutcome::Translated { from_cache: true, .. })
    }
}

type InFlight = Arc<OnceCell<TranslationOutcome>>;

/// Classifier, client and cache wired together; constructed once at startup
/// and shared by every interception pass.
pub struct TranslationService {
    client: Arc<dyn TranslationClient>,
    classifier: Arc<LanguageClassifier>,
    cache: Arc<TranslationCache>,
    cache_enabled: bool,
    single_flight: bool,
    request_timeout: Duration,
    shutdown: CancellationToken,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl TranslationService {
    pub fn new(
        client: Arc<dyn TranslationClient>,
        classifier: Arc<LanguageClassifier>,
        cache: Arc<TranslationCache>,
    ) -> Self {
        Self {
            client,
            classifier,
            cache,
            cache_enabled: true,
            single_flight: false,
            request_timeout: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &TranslateConfig,
        client: Arc<dyn TranslationClient>,
        cache: Arc<TranslationCache>,
    ) -> Self {
        let classifier = Arc::new(LanguageClassifier::with_whatlang(
            config.target_language.clone(),
        ));
        Self::new(client, classifier, cache)
            .with_cache_enabled(config.cache_enabled)
            .with_single_flight(config.single_flight)
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn classifier(&self) -> &LanguageClassifier {
        &self.classifier
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn needs_translation(&self, text: &str) -> bool {
        self.classifier.needs_translation(text)
    }

    /// Abort every in-flight backend call (end of session).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Cache lookup, then backend call with write-through on a miss.
    pub async fn translate_with_cache(&self, text: &str) -> TranslationOutcome {
        if self.cache_enabled {
            if let Some(hit) = self.cache.lookup(text) {
                debug!(chars = text.chars().count(), "translation cache hit");
                return TranslationOutcome::Translated {
                    text: hit,
                    from_cache: true,
                };
            }
        }

        if self.single_flight {
            self.translate_shared(text).await
        } else {
            self.translate_uncached(text).await
        }
    }

    /// Concurrent misses for the same text wait on the first caller's result.
    async fn translate_shared(&self, text: &str) -> TranslationOutcome {
        let cell = self
            .in_flight
            .lock()
            .entry(text.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell
            .get_or_init(|| self.translate_uncached(text))
            .await
            .clone();

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(text).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(text);
        }
        outcome
    }

    async fn translate_uncached(&self, text: &str) -> TranslationOutcome {
        let direction = self.classifier.detect(text);
        let token = self.shutdown.child_token();

        let call = self
            .client
            .translate(text, &direction.from, &direction.to, &token);
        let result = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                Err(GraphlateError::Timeout(self.request_timeout.as_secs()))
            }
        };

        let translated = result.and_then(|raw| {
            let formatted = format_translation(&raw);
            if formatted.is_empty() {
                Err(GraphlateError::Translation("empty translation received".to_string()))
            } else {
                Ok(formatted)
            }
        });

        match translated {
            Ok(translated) => {
                self.cache.store(text, &translated);
                debug!(
                    backend = self.client.name(),
                    from = %direction.from,
                    to = %direction.to,
                    "translated"
                );
                TranslationOutcome::Translated {
                    text: translated,
                    from_cache: false,
                }
            }
            Err(e) => {
                warn!(
                    backend = self.client.name(),
                    error = %e,
                    "translation failed, keeping original text"
                );
                TranslationOutcome::Failed {
                    original: text.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}
