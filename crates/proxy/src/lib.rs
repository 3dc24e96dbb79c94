//! HTTP proxy layer: axum router, route handlers, HTTP backend and usage.
//!
//! Each client-facing endpoint speaks one dialect; the configured route
//! decides which backend dialect the request is translated into.

mod backend;
mod chat;
mod credentials;
mod error;
mod gemini;
mod messages;
mod relay;
pub mod usage;

pub use backend::HttpBackend;
pub use credentials::ConfigCredentials;
pub use error::ApiError;
pub use usage::UsageStats;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use protogate_config::Config;
use protogate_engine::{Dispatcher, Registry, RegistryBuilder};
use protogate_translate::{TranslatorOptions, register_all};
use protogate_types::{BackendCaller, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all route handlers.
pub struct AppState {
    /// Server configuration (routes, backends, listen address).
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
    /// In-memory usage statistics.
    pub usage: Arc<UsageStats>,
}

/// Registers every converter pair with the configured options.
///
/// # Errors
///
/// Returns a `Registry` error if registration or `build()` fails.
pub fn build_registry(config: &Config) -> Result<Registry> {
    let mut builder =
        RegistryBuilder::new().allow_overrides(config.translator.allow_duplicate_registrations);
    let options = TranslatorOptions {
        kiro_profile_arn: config.translator.kiro_profile_arn.clone(),
        gemini_cli_project: config.translator.gemini_cli_project.clone(),
    };
    register_all(&mut builder, &options)?;
    builder.build()
}

impl AppState {
    /// Builds the state with an HTTP backend using the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the converter registry cannot be built.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let auth = Arc::new(ConfigCredentials::from_config(&config));
        let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &config, auth));
        Self::with_backend(config, backend)
    }

    /// Builds the state around an arbitrary backend caller.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the converter registry cannot be built.
    pub fn with_backend(config: Config, backend: Arc<dyn BackendCaller>) -> Result<Arc<Self>> {
        let registry = Arc::new(build_registry(&config)?);
        Ok(Arc::new(Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(registry, backend),
            usage: Arc::new(UsageStats::new()),
        }))
    }
}

/// Build the full axum router.
///
/// Routes:
/// - POST /v1/chat/completions                  `OpenAI` chat
/// - POST /v1/responses                         `OpenAI` Responses
/// - POST /v1/messages                          Anthropic Messages
/// - POST /v1/messages/count_tokens             Anthropic token count
/// - POST /v1beta/models/{model}:{method}       Gemini
/// - POST /v1internal:{method}                  Gemini CLI
/// - GET  /v0/management/pairs
/// - GET  /v0/management/usage
pub fn make_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/responses", post(chat::responses))
        .route("/v1/messages", post(messages::messages))
        .route("/v1/messages/count_tokens", post(messages::count_tokens))
        .route("/v1beta/models/{action}", post(gemini::models_action))
        .route("/v1internal:generateContent", post(gemini::internal_action))
        .route("/v1internal:streamGenerateContent", post(gemini::internal_action))
        .route("/v1internal:countTokens", post(gemini::internal_action))
        // Management API
        .route("/v0/management/pairs", get(pairs_handler))
        .route("/v0/management/usage", get(usage_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn pairs_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pairs: Vec<Value> = state
        .dispatcher
        .registry()
        .keys()
        .into_iter()
        .map(|k| json!({ "source": k.source, "target": k.target }))
        .collect();
    Json(json!({ "pairs": pairs, "routes": state.config.routes }))
}

async fn usage_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snap = state.usage.snapshot();
    Json(serde_json::to_value(snap).unwrap_or_default())
}
