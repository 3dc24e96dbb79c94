//! Per-request orchestration: lookup, request conversion, backend call,
//! response conversion.

use crate::pipe::{ChunkStream, StreamPipe};
use crate::registry::Registry;
use bytes::Bytes;
use futures_util::StreamExt as _;
use protogate_types::{
    BackendCaller, BackendResponse, ByteStream, ErrorKind, ProtocolFormat, RequestContext,
    ResponseContext, ResponseTranslator, Result, StreamTranslator, TranslateError,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A client request addressed to a backend format.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub client: ProtocolFormat,
    pub backend: ProtocolFormat,
    /// Model override; defaults to the body's `model` field.
    pub model: Option<String>,
    pub body: Bytes,
    pub stream: bool,
}

/// Successful outcome of [`Dispatcher::translate`].
pub enum Translated {
    Complete(Value),
    Stream(ChunkStream),
}

/// A failed request, already rendered in the client's error schema.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DispatchError {
    #[source]
    pub error: TranslateError,
    /// HTTP status to answer with.
    pub status: u16,
    /// Client-format error body.
    pub body: Value,
}

enum Mode {
    Stream(Arc<dyn StreamTranslator>),
    Complete(Arc<dyn ResponseTranslator>),
}

/// Drives one client request through its registered converters.
pub struct Dispatcher {
    registry: Arc<Registry>,
    backend: Arc<dyn BackendCaller>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<Registry>, backend: Arc<dyn BackendCaller>) -> Self {
        Self { registry, backend }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Translates a request, calls the backend, and translates the answer.
    ///
    /// The pair lookup and the response-mode check run before the request
    /// converter, so an unsupported mode is reported as `ModeUnsupported`
    /// even when the converter would also have rejected the body. A body
    /// that is not JSON at all is still a `RequestConversion` error.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] whose body is shaped by the client
    /// format's error envelope.
    pub async fn translate(
        &self,
        req: TranslateRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<Translated, DispatchError> {
        let client = req.client.clone();
        self.run(req, cancel)
            .await
            .map_err(|e| self.reject(&client, e))
    }

    /// Answers a token-count request with the pair's counter.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] if the pair is unknown, has no counter, or
    /// the body cannot be counted.
    pub fn count_tokens(
        &self,
        client: &ProtocolFormat,
        backend: &ProtocolFormat,
        body: &[u8],
    ) -> std::result::Result<Value, DispatchError> {
        let run = || -> Result<Value> {
            let registration = self
                .registry
                .lookup(client, backend)
                .ok_or_else(|| TranslateError::unsupported_pair(client, backend))?;
            let counter = registration.response.token_count.as_ref().ok_or_else(|| {
                TranslateError::mode_unsupported(format!(
                    "token counting is not supported for {client} -> {backend}"
                ))
            })?;
            let request = parse_body(body)?;
            let tokens = counter.count_tokens(&request)?;
            Ok(counter.count_response(tokens))
        };
        run().map_err(|e| self.reject(client, e))
    }

    async fn run(&self, req: TranslateRequest, cancel: CancellationToken) -> Result<Translated> {
        let TranslateRequest {
            client,
            backend,
            model,
            body,
            stream,
        } = req;

        let registration = self
            .registry
            .lookup(&client, &backend)
            .ok_or_else(|| TranslateError::unsupported_pair(&client, &backend))?;

        let original = parse_body(&body)?;
        let model = model
            .or_else(|| original.get("model").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_default();
        tracing::info!(%client, %backend, %model, stream, "translating request");

        let caps = self
            .registry
            .response_capabilities(&backend, &client)
            .ok_or_else(|| TranslateError::unsupported_pair(&backend, &client))?;
        let mode = if stream {
            caps.stream.clone().map(Mode::Stream)
        } else {
            caps.non_stream.clone().map(Mode::Complete)
        };
        let Some(mode) = mode else {
            let wanted = if stream { "streaming" } else { "non-streaming" };
            return Err(TranslateError::mode_unsupported(format!(
                "{wanted} responses are not supported for {backend} -> {client}"
            )));
        };

        let translated = registration
            .request
            .translate_request(
                &RequestContext {
                    model: model.clone(),
                    stream,
                },
                original.clone(),
            )
            .map_err(|e| e.with_kind(ErrorKind::RequestConversion))?;

        let estimated_prompt_tokens =
            caps.token_count
                .as_ref()
                .and_then(|counter| match counter.count_tokens(&original) {
                    Ok(tokens) => Some(tokens),
                    Err(e) => {
                        tracing::debug!(error = %e, "prompt token estimate unavailable");
                        None
                    }
                });

        let ctx = ResponseContext {
            model: model.clone(),
            original_request: original,
            translated_request: translated.clone(),
            estimated_prompt_tokens,
        };

        let call = self.backend.call(&backend, &model, translated, stream);
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TranslateError::cancelled()),
            res = call => res.map_err(as_transport)?,
        };

        let framing = self.registry.framing(&backend);
        match mode {
            Mode::Stream(translator) => {
                let bytes: ByteStream = match response {
                    BackendResponse::Stream(s) => s,
                    BackendResponse::Complete(b) => {
                        Box::pin(futures_util::stream::once(async move { Ok(b) }))
                    }
                };
                let pipe = StreamPipe::new(
                    translator.start(&ctx),
                    framing,
                    self.registry.envelope(&client),
                    cancel,
                );
                tracing::debug!(%client, %backend, %model, "streaming response");
                Ok(Translated::Stream(pipe.run(bytes)))
            }
            Mode::Complete(translator) => {
                let body = match response {
                    BackendResponse::Complete(b) => b,
                    BackendResponse::Stream(s) => collect_body(s, &cancel).await?,
                };
                let decoded = framing.decode_complete(&body)?;
                let out = translator
                    .translate_response(&ctx, decoded)
                    .map_err(|e| e.with_kind(ErrorKind::ResponseConversion))?;
                tracing::debug!(%client, %backend, %model, "response complete");
                Ok(Translated::Complete(out))
            }
        }
    }

    fn reject(&self, client: &ProtocolFormat, error: TranslateError) -> DispatchError {
        if error.kind() == ErrorKind::StreamCancelled {
            tracing::debug!(%client, "request cancelled");
        } else {
            tracing::warn!(%client, kind = %error.kind(), error = %error, "translation failed");
        }
        let body = self.registry.envelope(client).body(&error);
        DispatchError {
            status: error.http_status(),
            body,
            error,
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| {
        TranslateError::request(format!("request body is not valid JSON: {e}")).with_source(e)
    })
}

/// Tags a backend failure as transport unless the caller already knew
/// better (an undecodable body stays a conversion error).
fn as_transport(err: TranslateError) -> TranslateError {
    match err.kind() {
        ErrorKind::BackendTransport
        | ErrorKind::ResponseConversion
        | ErrorKind::StreamCancelled => err,
        _ => err.with_kind(ErrorKind::BackendTransport),
    }
}

async fn collect_body(mut inner: ByteStream, cancel: &CancellationToken) -> Result<Bytes> {
    let mut buf = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TranslateError::cancelled()),
            next = inner.next() => next,
        };
        match next {
            Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
            Some(Err(e)) => return Err(as_transport(e)),
            None => return Ok(Bytes::from(buf)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::Framing;
    use crate::registry::{RegistryBuilder, ResponseCapabilities};
    use async_trait::async_trait;
    use futures_util::stream;
    use protogate_types::{
        ErrorEnvelope, RequestTranslator, StreamChunk, StreamSession, TokenCounter,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLIENT: ProtocolFormat = ProtocolFormat::from_static("alpha");
    const BACKEND: ProtocolFormat = ProtocolFormat::from_static("beta");

    struct Wrap;

    impl RequestTranslator for Wrap {
        fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
            if req.get("reject").is_some() {
                return Err(TranslateError::response("cannot express request"));
            }
            Ok(json!({"wrapped": req, "model": ctx.model, "stream": ctx.stream}))
        }
    }

    struct Unwrap;

    impl ResponseTranslator for Unwrap {
        fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
            Ok(json!({
                "answer": res["out"],
                "model": ctx.model,
                "prompt_tokens": ctx.estimated_prompt_tokens,
            }))
        }
    }

    struct Session;

    impl StreamSession for Session {
        fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
            Ok(vec![StreamChunk::data(json!({"delta": event["out"]}))])
        }
    }

    struct Streams;

    impl StreamTranslator for Streams {
        fn start(&self, _ctx: &ResponseContext) -> Box<dyn StreamSession> {
            Box::new(Session)
        }
    }

    struct Counter {
        fail: bool,
    }

    impl TokenCounter for Counter {
        fn count_tokens(&self, _request: &Value) -> Result<u64> {
            if self.fail {
                Err(TranslateError::token_count("no tokenizer"))
            } else {
                Ok(42)
            }
        }

        fn count_response(&self, tokens: u64) -> Value {
            json!({"tokens": tokens})
        }
    }

    struct AlphaEnvelope;

    impl ErrorEnvelope for AlphaEnvelope {
        fn body(&self, err: &TranslateError) -> Value {
            json!({"alpha_error": {"kind": err.kind().as_str(), "detail": err.message()}})
        }
    }

    #[derive(Default)]
    struct MockBackend {
        calls: AtomicUsize,
        seen: Mutex<Vec<Value>>,
        reply: Mutex<Option<Result<BackendResponse>>>,
        hang: bool,
    }

    impl MockBackend {
        fn replying(reply: Result<BackendResponse>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl BackendCaller for MockBackend {
        async fn call(
            &self,
            _target: &ProtocolFormat,
            _model: &str,
            request: Value,
            _stream: bool,
        ) -> Result<BackendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(TranslateError::transport("no reply scripted")))
        }
    }

    fn registry(caps: ResponseCapabilities) -> Arc<Registry> {
        let mut b = RegistryBuilder::new();
        b.register(CLIENT, BACKEND, Wrap, caps).unwrap();
        b.error_envelope(CLIENT, AlphaEnvelope);
        Arc::new(b.build().unwrap())
    }

    fn full_caps(fail_count: bool) -> ResponseCapabilities {
        ResponseCapabilities::new()
            .with_stream(Streams)
            .with_non_stream(Unwrap)
            .with_token_counter(Counter { fail: fail_count })
    }

    fn request(body: Value, stream: bool) -> TranslateRequest {
        TranslateRequest {
            client: CLIENT,
            backend: BACKEND,
            model: None,
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
            stream,
        }
    }

    #[tokio::test]
    async fn test_complete_round_trip() {
        let backend = MockBackend::replying(Ok(BackendResponse::Complete(Bytes::from(
            r#"{"out":"hi"}"#,
        ))));
        let d = Dispatcher::new(registry(full_caps(false)), backend.clone());
        let Translated::Complete(out) = d
            .translate(request(json!({"model": "m1", "q": 1}), false), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected complete response");
        };
        assert_eq!(out["answer"], "hi");
        assert_eq!(out["model"], "m1");
        assert_eq!(out["prompt_tokens"], 42);
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0]["wrapped"]["q"], 1);
        assert_eq!(seen[0]["stream"], false);
    }

    #[tokio::test]
    async fn test_token_count_failure_is_not_fatal() {
        let backend = MockBackend::replying(Ok(BackendResponse::Complete(Bytes::from(
            r#"{"out":"x"}"#,
        ))));
        let d = Dispatcher::new(registry(full_caps(true)), backend);
        let Translated::Complete(out) = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected complete response");
        };
        assert!(out["prompt_tokens"].is_null());
    }

    #[tokio::test]
    async fn test_unsupported_pair_never_calls_backend() {
        let backend = Arc::new(MockBackend::default());
        let d = Dispatcher::new(registry(full_caps(false)), backend.clone());
        let mut req = request(json!({"model": "m"}), false);
        req.backend = ProtocolFormat::from("gamma");
        let err = d.translate(req, CancellationToken::new()).await.err().unwrap();
        assert_eq!(err.error.kind(), ErrorKind::UnsupportedPair);
        assert_eq!(err.status, 400);
        assert_eq!(err.body["alpha_error"]["kind"], "unsupported_pair");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_streaming_unsupported_fails_before_backend() {
        let backend = Arc::new(MockBackend::default());
        let d = Dispatcher::new(
            registry(ResponseCapabilities::new().with_non_stream(Unwrap)),
            backend.clone(),
        );
        let err = d
            .translate(request(json!({"model": "m"}), true), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::ModeUnsupported);
        assert!(err.error.message().contains("streaming"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mode_checked_before_request_conversion() {
        let backend = Arc::new(MockBackend::default());
        let d = Dispatcher::new(
            registry(ResponseCapabilities::new().with_non_stream(Unwrap)),
            backend.clone(),
        );
        let err = d
            .translate(request(json!({"reject": true}), true), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::ModeUnsupported);

        let err = d
            .translate(
                TranslateRequest {
                    body: Bytes::from_static(b"{not json"),
                    ..request(json!({}), true)
                },
                CancellationToken::new(),
            )
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::RequestConversion);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_conversion_error_is_tagged() {
        let backend = Arc::new(MockBackend::default());
        let d = Dispatcher::new(registry(full_caps(false)), backend.clone());
        let err = d
            .translate(request(json!({"reject": true}), false), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::RequestConversion);
        assert_eq!(err.status, 400);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let backend = Arc::new(MockBackend::default());
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let mut req = request(json!({}), false);
        req.body = Bytes::from_static(b"{not json");
        let err = d.translate(req, CancellationToken::new()).await.err().unwrap();
        assert_eq!(err.error.kind(), ErrorKind::RequestConversion);
    }

    #[tokio::test]
    async fn test_upstream_error_uses_client_envelope() {
        let backend = MockBackend::replying(Err(TranslateError::upstream(429, "quota exhausted")));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let err = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, 429);
        assert_eq!(err.body["alpha_error"]["kind"], "backend_transport");
        assert_eq!(err.body["alpha_error"]["detail"], "quota exhausted");
    }

    #[tokio::test]
    async fn test_undecodable_backend_body_keeps_conversion_kind() {
        let backend = MockBackend::replying(Err(TranslateError::response("malformed stream event")));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let err = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::ResponseConversion);
        assert_eq!(err.status, 502);
        assert_eq!(err.body["alpha_error"]["kind"], "response_conversion");
    }

    #[tokio::test]
    async fn test_backend_errors_default_to_transport() {
        let backend = MockBackend::replying(Err(TranslateError::request("bad credential format")));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let err = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::BackendTransport);
    }

    #[tokio::test]
    async fn test_cancel_during_backend_call() {
        let backend = Arc::new(MockBackend {
            hang: true,
            ..MockBackend::default()
        });
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });
        let err = d
            .translate(request(json!({"model": "m"}), true), cancel)
            .await
            .err()
            .unwrap();
        assert_eq!(err.error.kind(), ErrorKind::StreamCancelled);
        assert_eq!(err.status, 499);
    }

    #[tokio::test]
    async fn test_stream_over_complete_backend_body() {
        let backend = MockBackend::replying(Ok(BackendResponse::Complete(Bytes::from(
            "data: {\"out\":\"a\"}\n\ndata: {\"out\":\"b\"}\n\n",
        ))));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let Translated::Stream(s) = d
            .translate(request(json!({"model": "m"}), true), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected stream");
        };
        let chunks: Vec<StreamChunk> = s.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].data["delta"], "b");
    }

    #[tokio::test]
    async fn test_complete_over_streamed_backend_body() {
        let parts: Vec<Result<Bytes>> = vec![Ok(Bytes::from(r#"{"out""#)), Ok(Bytes::from(r#":"joined"}"#))];
        let backend = MockBackend::replying(Ok(BackendResponse::Stream(Box::pin(stream::iter(parts)))));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let Translated::Complete(out) = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected complete response");
        };
        assert_eq!(out["answer"], "joined");
    }

    #[tokio::test]
    async fn test_stream_error_chunk_uses_client_envelope() {
        let backend = MockBackend::replying(Ok(BackendResponse::Complete(Bytes::from(
            "data: {broken\n",
        ))));
        let d = Dispatcher::new(registry(full_caps(false)), backend);
        let Translated::Stream(s) = d
            .translate(request(json!({"model": "m"}), true), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected stream");
        };
        let chunks: Vec<StreamChunk> = s.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data["alpha_error"]["kind"], "response_conversion");
    }

    struct CountEvents;

    impl ResponseTranslator for CountEvents {
        fn translate_response(&self, _ctx: &ResponseContext, res: Value) -> Result<Value> {
            Ok(json!({"events": res.as_array().map_or(0, Vec::len)}))
        }
    }

    #[tokio::test]
    async fn test_event_stream_backend_framing() {
        let mut b = RegistryBuilder::new();
        b.register(
            CLIENT,
            BACKEND,
            Wrap,
            ResponseCapabilities::new().with_non_stream(CountEvents),
        )
        .unwrap();
        b.framing(BACKEND, Framing::EventStream);
        let backend = MockBackend::replying(Ok(BackendResponse::Complete(Bytes::from(
            "\u{0}{\"content\":\"x\"}\u{0}{\"content\":\"y\"}",
        ))));
        let d = Dispatcher::new(Arc::new(b.build().unwrap()), backend);
        let Translated::Complete(out) = d
            .translate(request(json!({"model": "m"}), false), CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected complete response");
        };
        assert_eq!(out["events"], 2);
    }

    #[test]
    fn test_count_tokens() {
        let d = Dispatcher::new(registry(full_caps(false)), Arc::new(MockBackend::default()));
        let out = d.count_tokens(&CLIENT, &BACKEND, br#"{"model":"m"}"#).unwrap();
        assert_eq!(out["tokens"], 42);
    }

    #[test]
    fn test_count_tokens_without_counter() {
        let d = Dispatcher::new(
            registry(ResponseCapabilities::new().with_non_stream(Unwrap)),
            Arc::new(MockBackend::default()),
        );
        let err = d.count_tokens(&CLIENT, &BACKEND, b"{}").err().unwrap();
        assert_eq!(err.error.kind(), ErrorKind::ModeUnsupported);
    }
}
