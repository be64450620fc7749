//! Core adaptor abstractions for taskgate.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Adaptor implementations construct `UpstreamHttpRequest` values and
//! translate upstream bodies; a higher layer performs IO through the
//! `UpstreamClient` trait.

pub mod adaptor;
pub mod errors;
pub mod headers;
pub mod http;
pub mod info;
pub mod registry;
pub mod task;

pub use adaptor::{Adaptor, RelayKind, SubmitAck, SubmitOutcome, TaskAdaptor};
pub use errors::{AdaptorError, RelayError, RelayResult};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use http::{
    HttpMethod, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransportErrorKind,
};
pub use info::{ChannelMeta, PriceData, RelayInfo, auth_header_for, size_ratio};
pub use registry::ChannelRegistry;
pub use task::{Task, TaskInfo, TaskPrivateData, TaskProperties, TaskStatus, status_from_provider};
