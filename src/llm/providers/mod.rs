
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::chat::{ChatSession, SessionOptions};
use super::client::LlmClient;
use super::errors::LlmError;
use super::openai::OpenAiClient;

/// One endpoint: its client, its chat session and the models it serves
#[derive(Debug)]
pub struct Provider {
    pub client: Arc<dyn LlmClient>,
    pub session: Arc<Mutex<ChatSession>>,
    pub available_models: Vec<String>,
}

impl Provider {
    #[inline]
    pub fn new(client: Arc<dyn LlmClient>, options: SessionOptions) -> Self {
        let session = ChatSession::new(Arc::clone(&client), options);
        Self {
            client,
            session: Arc::new(Mutex::new(session)),
            available_models: Vec::new(),
        }
    }

    #[inline]
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    #[inline]
    pub fn supports(&self, model: &str) -> bool {
        self.available_models.iter().any(|m| m == model)
    }
}

/// Settings needed to build one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Overrides the session default temperature for this provider
    pub temperature: Option<f64>,
}

/// Ordered collection of providers; earlier entries win when several serve a model
#[derive(Debug, Default)]
pub struct Providers {
    providers: Vec<Provider>,
}

impl Providers {
    #[inline]
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// Build an OpenAI-compatible provider for every entry
    #[inline]
    pub fn from_settings(
        settings: &[ProviderSettings],
        options: &SessionOptions,
    ) -> Result<Self, LlmError> {
        let providers = settings
            .iter()
            .map(|s| {
                let client = OpenAiClient::new(&s.base_url, s.api_key.clone())?;
                let options = SessionOptions {
                    temperature: s.temperature.or(options.temperature),
                    ..options.clone()
                };
                Ok(Provider::new(Arc::new(client), options))
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        Ok(Self { providers })
    }

    /// Ask every provider for its model list. Stops at the first failure.
    #[inline]
    pub async fn fetch_models(&mut self, cancel: &CancellationToken) -> Result<(), LlmError> {
        for provider in &mut self.providers {
            let models = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::Cancelled),
                result = provider.client.list_models() => result?,
            };
            info!("{} serves {} models", provider.client.base_url(), models.len());
            provider.available_models = models;
        }
        Ok(())
    }

    /// First provider whose model list contains `model`
    #[inline]
    pub fn provider_for(&self, model: &str) -> Result<&Provider, LlmError> {
        self.providers
            .iter()
            .find(|p| p.supports(model))
            .ok_or_else(|| LlmError::NoProviderFor(model.to_string()))
    }

    /// Every model served by any provider, in provider order without duplicates
    #[inline]
    pub fn all_models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for model in self.providers.iter().flat_map(|p| &p.available_models) {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }

    /// Dimension of the embedding model, found by embedding the empty string
    #[inline]
    pub async fn embedding_dim(
        &self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, LlmError> {
        let provider = self.provider_for(model)?;
        let vector = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = provider.client.embed(model, "") => result?,
        };
        if vector.is_empty() {
            return Err(LlmError::NoEmbeddingReturned);
        }
        debug!("Embedding model {} has dimension {}", model, vector.len());
        Ok(vector.len())
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Provider> {
        self.providers.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Close every client
    #[inline]
    pub fn close(&self) {
        for provider in &self.providers {
            provider.client.close();
        }
    }
}

impl<'a> IntoIterator for &'a Providers {
    type Item = &'a Provider;
    type IntoIter = std::slice::Iter<'a, Provider>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.providers.iter()
    }
}
