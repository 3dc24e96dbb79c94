//! In-memory request and token counters.

use protogate_types::ProtocolFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one model or one client format.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Counters {
    pub requests: u64,
    pub success: u64,
    pub failure: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Counters {
    fn success(&mut self, input_tokens: u64, output_tokens: u64) {
        self.requests += 1;
        self.success += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }

    fn failure(&mut self) {
        self.requests += 1;
        self.failure += 1;
    }
}

#[derive(Debug, Default)]
struct Breakdown {
    models: BTreeMap<String, Counters>,
    clients: BTreeMap<ProtocolFormat, Counters>,
}

/// Process-wide usage tracker shared by all handlers.
#[derive(Debug, Default)]
pub struct UsageStats {
    total_requests: AtomicU64,
    success_requests: AtomicU64,
    failure_requests: AtomicU64,
    breakdown: Mutex<Breakdown>,
}

/// JSON-serializable snapshot of current usage.
#[derive(Debug, Serialize)]
pub struct UsageSnapshot {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failure_requests: u64,
    pub models: BTreeMap<String, Counters>,
    pub clients: BTreeMap<ProtocolFormat, Counters>,
}

impl UsageStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a translated request that reached the client.
    ///
    /// Streams are recorded when their body is dropped, with the largest
    /// usage figures seen in their chunks.
    pub fn record_success(
        &self,
        client: &ProtocolFormat,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.success_requests.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut b) = self.breakdown.lock() {
            b.models
                .entry(model.to_string())
                .or_default()
                .success(input_tokens, output_tokens);
            b.clients
                .entry(client.clone())
                .or_default()
                .success(input_tokens, output_tokens);
        }
    }

    /// Records a request answered with an error.
    pub fn record_failure(&self, client: &ProtocolFormat, model: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failure_requests.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut b) = self.breakdown.lock() {
            b.models.entry(model.to_string()).or_default().failure();
            b.clients.entry(client.clone()).or_default().failure();
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        let (models, clients) = self
            .breakdown
            .lock()
            .map(|b| (b.models.clone(), b.clients.clone()))
            .unwrap_or_default();
        UsageSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_requests: self.success_requests.load(Ordering::Relaxed),
            failure_requests: self.failure_requests.load(Ordering::Relaxed),
            models,
            clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success() {
        let stats = UsageStats::new();
        stats.record_success(&ProtocolFormat::CLAUDE, "claude-sonnet-4-5", 100, 200);
        stats.record_success(&ProtocolFormat::CLAUDE, "claude-sonnet-4-5", 50, 100);
        stats.record_success(&ProtocolFormat::OPENAI, "gpt-4o", 80, 150);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.success_requests, 3);
        assert_eq!(snap.failure_requests, 0);

        let sonnet = &snap.models["claude-sonnet-4-5"];
        assert_eq!(sonnet.requests, 2);
        assert_eq!(sonnet.input_tokens, 150);
        assert_eq!(sonnet.output_tokens, 300);
        assert_eq!(snap.clients[&ProtocolFormat::OPENAI].requests, 1);
    }

    #[test]
    fn test_record_failure() {
        let stats = UsageStats::new();
        stats.record_failure(&ProtocolFormat::GEMINI, "gemini-2.5-pro");
        stats.record_success(&ProtocolFormat::GEMINI, "gemini-2.5-pro", 10, 20);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.failure_requests, 1);
        let model = &snap.models["gemini-2.5-pro"];
        assert_eq!((model.requests, model.success, model.failure), (2, 1, 1));
        assert_eq!(snap.clients[&ProtocolFormat::GEMINI].failure, 1);
    }

    #[test]
    fn test_snapshot_serializes_format_keys() {
        let stats = UsageStats::new();
        stats.record_failure(&ProtocolFormat::GEMINI_CLI, "m");
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["clients"]["gemini-cli"]["failure"], 1);
        assert_eq!(json["models"]["m"]["requests"], 1);
    }
}
