//! Format registry: which converters exist for which `(source, target)` pair.
//!
//! Registration happens once at startup through [`RegistryBuilder`]; the
//! resulting [`Registry`] is immutable and safe to share across requests.

use crate::envelope::DefaultEnvelope;
use crate::framing::Framing;
use protogate_types::{
    ConversionKey, ErrorEnvelope, ProtocolFormat, RequestTranslator, ResponseTranslator, Result,
    StreamTranslator, TokenCounter, TranslateError,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Response-side converters registered alongside a request converter.
#[derive(Clone, Default)]
pub struct ResponseCapabilities {
    pub stream: Option<Arc<dyn StreamTranslator>>,
    pub non_stream: Option<Arc<dyn ResponseTranslator>>,
    pub token_count: Option<Arc<dyn TokenCounter>>,
}

impl ResponseCapabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stream(mut self, translator: impl StreamTranslator + 'static) -> Self {
        self.stream = Some(Arc::new(translator));
        self
    }

    #[must_use]
    pub fn with_non_stream(mut self, translator: impl ResponseTranslator + 'static) -> Self {
        self.non_stream = Some(Arc::new(translator));
        self
    }

    #[must_use]
    pub fn with_token_counter(mut self, counter: impl TokenCounter + 'static) -> Self {
        self.token_count = Some(Arc::new(counter));
        self
    }

    /// At least one of the streaming or non-streaming converters is present.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.stream.is_some() || self.non_stream.is_some()
    }
}

impl std::fmt::Debug for ResponseCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCapabilities")
            .field("stream", &self.stream.is_some())
            .field("non_stream", &self.non_stream.is_some())
            .field("token_count", &self.token_count.is_some())
            .finish()
    }
}

/// One registered conversion: a request converter plus its response bundle.
#[derive(Clone)]
pub struct Registration {
    pub request: Arc<dyn RequestTranslator>,
    pub response: ResponseCapabilities,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

type PairTable = HashMap<ProtocolFormat, HashMap<ProtocolFormat, Registration>>;

/// Mutable registration phase.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: PairTable,
    duplicates: BTreeSet<ConversionKey>,
    envelopes: HashMap<ProtocolFormat, Arc<dyn ErrorEnvelope>>,
    framings: HashMap<ProtocolFormat, Framing>,
    allow_overrides: bool,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, duplicate registrations are resolved last-write-wins
    /// instead of failing [`build`](Self::build).
    #[must_use]
    pub fn allow_overrides(mut self, allow: bool) -> Self {
        self.allow_overrides = allow;
        self
    }

    /// Registers the converters for `source -> target`.
    ///
    /// The response bundle is looked up later for the reverse direction.
    /// Re-registering a key overwrites the previous entry.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the bundle has neither a streaming nor a
    /// non-streaming converter.
    pub fn register(
        &mut self,
        source: ProtocolFormat,
        target: ProtocolFormat,
        request: impl RequestTranslator + 'static,
        response: ResponseCapabilities,
    ) -> Result<&mut Self> {
        if !response.is_usable() {
            return Err(TranslateError::registry(format!(
                "{source} -> {target}: response bundle needs a stream or non-stream converter"
            )));
        }

        let registration = Registration {
            request: Arc::new(request),
            response,
        };
        let previous = self
            .entries
            .entry(source.clone())
            .or_default()
            .insert(target.clone(), registration);
        if previous.is_some() {
            tracing::warn!(%source, %target, "duplicate converter registration, overwriting");
            self.duplicates.insert(ConversionKey::new(source, target));
        } else {
            tracing::debug!(%source, %target, "registered converter");
        }
        Ok(self)
    }

    /// Sets the error schema used when `format` is the client format.
    pub fn error_envelope(
        &mut self,
        format: ProtocolFormat,
        envelope: impl ErrorEnvelope + 'static,
    ) -> &mut Self {
        self.envelopes.insert(format, Arc::new(envelope));
        self
    }

    /// Declares how `format` frames its response bodies when it is a backend.
    pub fn framing(&mut self, format: ProtocolFormat, framing: Framing) -> &mut Self {
        self.framings.insert(format, framing);
        self
    }

    /// Freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error listing duplicated keys unless overrides
    /// were allowed.
    pub fn build(self) -> Result<Registry> {
        if !self.duplicates.is_empty() && !self.allow_overrides {
            let keys: Vec<String> = self.duplicates.iter().map(ToString::to_string).collect();
            return Err(TranslateError::registry(format!(
                "duplicate converter registrations: {}",
                keys.join(", ")
            )));
        }
        let registry = Registry {
            entries: self.entries,
            envelopes: self.envelopes,
            framings: self.framings,
            fallback: Arc::new(DefaultEnvelope),
        };
        tracing::info!(pairs = registry.len(), "format registry ready");
        Ok(registry)
    }
}

/// Immutable conversion table.
pub struct Registry {
    entries: PairTable,
    envelopes: HashMap<ProtocolFormat, Arc<dyn ErrorEnvelope>>,
    framings: HashMap<ProtocolFormat, Framing>,
    fallback: Arc<dyn ErrorEnvelope>,
}

impl Registry {
    /// Converters registered for `source -> target`.
    #[must_use]
    pub fn lookup(&self, source: &ProtocolFormat, target: &ProtocolFormat) -> Option<&Registration> {
        self.entries.get(source)?.get(target)
    }

    /// Response converters for a `backend` response heading to `client`.
    ///
    /// These live on the entry registered for the request direction
    /// `client -> backend`.
    #[must_use]
    pub fn response_capabilities(
        &self,
        backend: &ProtocolFormat,
        client: &ProtocolFormat,
    ) -> Option<&ResponseCapabilities> {
        self.lookup(client, backend).map(|r| &r.response)
    }

    /// Error schema for a client format, falling back to the `OpenAI` shape.
    #[must_use]
    pub fn envelope(&self, format: &ProtocolFormat) -> Arc<dyn ErrorEnvelope> {
        self.envelopes
            .get(format)
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }

    /// Body framing of a backend format.
    #[must_use]
    pub fn framing(&self, format: &ProtocolFormat) -> Framing {
        self.framings.get(format).copied().unwrap_or_default()
    }

    /// All registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ConversionKey> {
        let mut keys: Vec<ConversionKey> = self
            .entries
            .iter()
            .flat_map(|(source, targets)| {
                targets
                    .keys()
                    .map(|target| ConversionKey::new(source.clone(), target.clone()))
            })
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
