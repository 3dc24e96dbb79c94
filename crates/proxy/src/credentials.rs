//! Static credentials taken from `backends.*.api_key`.

use async_trait::async_trait;
use protogate_config::Config;
use protogate_types::{AuthProvider, ProtocolFormat, Result, TranslateError};
use std::collections::BTreeMap;

/// [`AuthProvider`] backed by the API keys in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentials {
    keys: BTreeMap<ProtocolFormat, String>,
}

impl ConfigCredentials {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let keys = config
            .backends
            .iter()
            .filter_map(|(format, backend)| {
                let key = backend.api_key.as_deref()?.trim();
                (!key.is_empty()).then(|| (format.clone(), key.to_string()))
            })
            .collect();
        Self { keys }
    }
}

#[async_trait]
impl AuthProvider for ConfigCredentials {
    async fn credential(&self, backend: &ProtocolFormat) -> Result<String> {
        self.keys.get(backend).cloned().ok_or_else(|| {
            TranslateError::upstream(401, format!("no api_key configured for backend '{backend}'"))
        })
    }
}
