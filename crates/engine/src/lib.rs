//! Translation engine: format registry, request dispatcher and streaming pipe.
//!
//! The engine knows nothing about concrete API dialects. Converters are
//! registered into a [`RegistryBuilder`] at startup, and the [`Dispatcher`]
//! routes each request through whatever the frozen [`Registry`] holds.

pub mod dispatcher;
pub mod envelope;
pub mod framing;
pub mod pipe;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher, TranslateRequest, Translated};
pub use envelope::DefaultEnvelope;
pub use framing::{Frame, FrameDecoder, Framing};
pub use pipe::{ChunkStream, StreamPipe};
pub use registry::{Registration, Registry, RegistryBuilder, ResponseCapabilities};
pub use tokio_util::sync::CancellationToken;
