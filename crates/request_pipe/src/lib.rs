pub mod bucket;
pub mod client;
pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod logging;
pub mod merge;
pub mod path;
pub mod pipeline;
pub mod processor;
pub mod service;
pub mod stack;
pub mod transport;

pub use bucket::{Admission, Bucket, DuplicatePolicy, PendingResult, SharedOutcome, Slot};
pub use client::{PipeClient, PipeClientBuilder};
pub use config::{PipeConfig, RequestConfig};
pub use context::{CancelCallback, Context, ContextInit, RequestOptions};
pub use emitter::{Emitter, PipeEvent};
pub use error::{PipeError, TransportError};
pub use handler::{FnMiddleware, Handler, SharedHandler};
pub use logging::init_tracing;
pub use merge::{deep_merge, merge_optional, AssignPolicy};
pub use path::interpolate;
pub use pipeline::{Env, Fingerprint, Pipeline};
pub use processor::RequestProcessor;
pub use service::{Method, ServiceDefaults, ServiceDefinition, ServiceSpec};
pub use stack::{MiddlewareStack, Named, ProcessorStack, ServiceStack, Stack};
pub use transport::{
    CancelHandle, ReqwestTransport, Transport, TransportRequest, TransportResponse,
};
