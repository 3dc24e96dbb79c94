//! Streaming pipe: backend bytes in, client chunks out.
//!
//! Frames are decoded and translated one at a time; every chunk produced by
//! a frame is yielded before the next frame is read. Cancellation drops the
//! backend stream at the next poll and discards anything buffered.

use crate::framing::{Frame, FrameDecoder, Framing};
use futures_util::{Stream, StreamExt as _, stream::unfold};
use protogate_types::{ByteStream, ErrorEnvelope, StreamChunk, StreamSession, TranslateError};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A pinned, sendable stream of client-format chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Binds one streaming session to one backend byte stream.
pub struct StreamPipe {
    session: Box<dyn StreamSession>,
    framing: Framing,
    envelope: Arc<dyn ErrorEnvelope>,
    cancel: CancellationToken,
}

impl StreamPipe {
    #[must_use]
    pub fn new(
        session: Box<dyn StreamSession>,
        framing: Framing,
        envelope: Arc<dyn ErrorEnvelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            framing,
            envelope,
            cancel,
        }
    }

    /// Starts pumping `inner` through the session.
    ///
    /// The returned stream never fails: errors become one terminal chunk in
    /// the client's error schema.
    #[must_use]
    pub fn run(self, inner: ByteStream) -> ChunkStream {
        let state = State {
            inner: Some(inner),
            decoder: FrameDecoder::new(self.framing),
            session: self.session,
            envelope: self.envelope,
            cancel: self.cancel,
            pending: VecDeque::new(),
            ended: false,
        };
        Box::pin(unfold(state, |mut s| async move {
            let chunk = s.next_chunk().await?;
            Some((chunk, s))
        }))
    }
}

struct State {
    inner: Option<ByteStream>,
    decoder: FrameDecoder,
    session: Box<dyn StreamSession>,
    envelope: Arc<dyn ErrorEnvelope>,
    cancel: CancellationToken,
    pending: VecDeque<StreamChunk>,
    ended: bool,
}

impl State {
    async fn next_chunk(&mut self) -> Option<StreamChunk> {
        loop {
            if self.cancel.is_cancelled() {
                self.abort();
                return None;
            }
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if self.ended {
                return None;
            }

            match self.decoder.next_frame() {
                Ok(Some(Frame::Event(event))) => {
                    self.translate(&event);
                    continue;
                }
                Ok(Some(Frame::Done)) => {
                    self.finish();
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.fail(&e);
                    continue;
                }
            }

            let Some(inner) = self.inner.as_mut() else {
                self.finish();
                continue;
            };
            let cancel = self.cancel.clone();
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = inner.next() => Some(item),
            };
            let Some(next) = next else {
                self.abort();
                return None;
            };

            match next {
                Some(Ok(bytes)) => self.decoder.push(&bytes),
                Some(Err(e)) => self.fail(&e),
                None => self.end_of_input(),
            }
        }
    }

    fn end_of_input(&mut self) {
        self.inner = None;
        match self.decoder.finish() {
            Ok(Some(Frame::Event(event))) => self.translate(&event),
            Ok(Some(Frame::Done) | None) => {}
            Err(e) => {
                self.fail(&e);
                return;
            }
        }
        if !self.ended {
            self.finish();
        }
    }

    fn translate(&mut self, event: &Value) {
        match self.session.translate_event(event) {
            Ok(chunks) => self.pending.extend(chunks),
            Err(e) => self.fail(&e),
        }
    }

    fn finish(&mut self) {
        self.inner = None;
        self.decoder.clear();
        match self.session.finalize() {
            Ok(chunks) => {
                self.pending.extend(chunks);
                self.ended = true;
            }
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&mut self, err: &TranslateError) {
        tracing::warn!(error = %err, "stream terminated by error");
        self.inner = None;
        self.decoder.clear();
        self.pending.push_back(self.envelope.stream_chunk(err));
        self.ended = true;
    }

    fn abort(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("stream cancelled, backend connection released");
        }
        self.decoder.clear();
        self.pending.clear();
        self.ended = true;
    }
}
