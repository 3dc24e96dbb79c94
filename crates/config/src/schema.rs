use protogate_types::ProtocolFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("route {client} -> {backend} has no backend entry")]
    MissingBackend {
        client: ProtocolFormat,
        backend: ProtocolFormat,
    },
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Options handed to the converters at registration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// `profileArn` sent with every Kiro request.
    #[serde(default)]
    pub kiro_profile_arn: Option<String>,
    /// Project placed in Gemini CLI request envelopes.
    #[serde(default)]
    pub gemini_cli_project: Option<String>,
    /// Resolve duplicate registrations last-write-wins instead of failing.
    #[serde(default)]
    pub allow_duplicate_registrations: bool,
}

/// Connection settings for one backend format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Whole-request timeout in seconds (defaults to 600).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    600
}

impl BackendConfig {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8318
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_routes() -> BTreeMap<ProtocolFormat, ProtocolFormat> {
    [
        (ProtocolFormat::OPENAI, ProtocolFormat::KIRO),
        (ProtocolFormat::CLAUDE, ProtocolFormat::OPENAI),
        (ProtocolFormat::GEMINI, ProtocolFormat::CODEX),
        (ProtocolFormat::GEMINI_CLI, ProtocolFormat::GEMINI),
        (ProtocolFormat::OPENAI_RESPONSE, ProtocolFormat::GEMINI),
    ]
    .into_iter()
    .collect()
}

fn default_backends() -> BTreeMap<ProtocolFormat, BackendConfig> {
    [
        (ProtocolFormat::OPENAI, "https://api.openai.com/v1"),
        (ProtocolFormat::CLAUDE, "https://api.anthropic.com"),
        (ProtocolFormat::GEMINI, "https://generativelanguage.googleapis.com"),
        (ProtocolFormat::GEMINI_CLI, "https://cloudcode-pa.googleapis.com"),
        (ProtocolFormat::CODEX, "https://chatgpt.com/backend-api/codex"),
        (ProtocolFormat::KIRO, "https://codewhisperer.us-east-1.amazonaws.com"),
    ]
    .into_iter()
    .map(|(format, url)| (format, BackendConfig::new(url)))
    .collect()
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen port (defaults to 8318).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen address (defaults to `127.0.0.1`).
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    /// Backend format serving each client format.
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<ProtocolFormat, ProtocolFormat>,
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<ProtocolFormat, BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            log: LogConfig::default(),
            translator: TranslatorConfig::default(),
            routes: default_routes(),
            backends: default_backends(),
        }
    }
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads configuration from a file path, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &Path) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
    }

    /// Loads defaults, the optional YAML file, then `PROTOGATE_*` variables
    /// (`__` separates nested keys, e.g. `PROTOGATE_LOG__LEVEL`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a source fails to parse or a route points
    /// at a backend without connection settings.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use figment::{
            Figment,
            providers::{Env, Format as _, Serialized, Yaml},
        };
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("PROTOGATE_").split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        tracing::debug!(
            path = ?path,
            routes = config.routes.len(),
            backends = config.backends.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Checks that every routed backend has connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBackend`] for the first route without one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (client, backend) in &self.routes {
            if !self.backends.contains_key(backend) {
                return Err(ConfigError::MissingBackend {
                    client: client.clone(),
                    backend: backend.clone(),
                });
            }
        }
        Ok(())
    }

    /// Backend format configured for `client`.
    #[must_use]
    pub fn route(&self, client: &ProtocolFormat) -> Option<&ProtocolFormat> {
        self.routes.get(client)
    }

    #[must_use]
    pub fn backend(&self, format: &ProtocolFormat) -> Option<&BackendConfig> {
        self.backends.get(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE_YAML: &str = r#"
port: 9000
host: "0.0.0.0"
log:
  level: debug
  json: true
translator:
  kiro_profile_arn: "arn:aws:codewhisperer:us-east-1:1:profile/ABC"
routes:
  claude: kiro
backends:
  kiro:
    base_url: "http://localhost:9999"
    api_key: "kiro-token"
"#;

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.port, 8318);
        assert_eq!(c.host, "127.0.0.1");
        assert_eq!(c.log.level, "info");
        assert!(!c.log.json);
        assert_eq!(c.route(&ProtocolFormat::OPENAI), Some(&ProtocolFormat::KIRO));
        assert_eq!(c.backends.len(), 6);
        c.validate().unwrap();
    }

    #[test]
    fn test_from_yaml_port_and_host() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.host, "0.0.0.0");
        assert_eq!(c.log.level, "debug");
        assert!(c.log.json);
    }

    #[test]
    fn test_from_yaml_routes_merge_with_defaults() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.route(&ProtocolFormat::CLAUDE), Some(&ProtocolFormat::KIRO));
        assert_eq!(c.route(&ProtocolFormat::GEMINI), Some(&ProtocolFormat::CODEX));
    }

    #[test]
    fn test_from_yaml_backend_override() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        let kiro = c.backend(&ProtocolFormat::KIRO).unwrap();
        assert_eq!(kiro.base_url, "http://localhost:9999");
        assert_eq!(kiro.api_key.as_deref(), Some("kiro-token"));
        assert_eq!(kiro.timeout_secs, 600);
        assert_eq!(
            c.translator.kiro_profile_arn.as_deref(),
            Some("arn:aws:codewhisperer:us-east-1:1:profile/ABC")
        );
    }

    #[test]
    fn test_from_yaml_defaults_applied() {
        let c = Config::from_yaml("port: 1234").unwrap();
        assert_eq!(c.port, 1234);
        assert_eq!(c.host, "127.0.0.1"); // default preserved
        assert!(c.translator.gemini_cli_project.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_YAML.as_bytes()).unwrap();
        let c = Config::from_file(file.path()).unwrap();
        assert_eq!(c.port, 9000);

        let loaded = Config::load(Some(file.path())).unwrap();
        assert_eq!(loaded.route(&ProtocolFormat::CLAUDE), Some(&ProtocolFormat::KIRO));
    }

    #[test]
    fn test_route_without_backend_rejected() {
        let mut c = Config::default();
        c.routes.insert(ProtocolFormat::CLAUDE, ProtocolFormat::new("mystery"));
        let err = c.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackend { .. }));
        assert!(err.to_string().contains("mystery"));
    }
}
