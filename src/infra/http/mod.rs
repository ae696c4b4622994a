//! Client-side HTTP plumbing: transport, notifications and the pipeline.

mod notify;
mod pipeline;
mod transport;

pub use notify::{
    ErrorReporter, Notifier, NotifyLevel, NullNotifier, SESSION_EXPIRED_MESSAGE, TracingNotifier,
    business_message, transport_message,
};
pub use pipeline::{ApiError, NotifyPolicy, RequestPipeline};
pub use transport::{
    ApiResponse, HttpTransport, RequestDescriptor, RequestOptions, Transport, TransportError,
};
pub(crate) use pipeline::METRIC_REQUEST_MS;
