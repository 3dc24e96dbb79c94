//! Core types and traits for the protogate workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! gateway: format identifiers, the error taxonomy, stream chunks, and the
//! converter and backend traits that each layer implements.

pub mod chunk;
pub mod error;
pub mod format;
pub mod traits;

pub use chunk::StreamChunk;
pub use error::{ErrorKind, Result, TranslateError};
pub use format::{ConversionKey, ProtocolFormat};
pub use traits::{
    AuthProvider, BackendCaller, BackendResponse, ByteStream, ErrorEnvelope, RequestContext,
    RequestTranslator, ResponseContext, ResponseTranslator, StreamSession, StreamTranslator,
    TokenCounter,
};
