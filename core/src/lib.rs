//! Resilient HTTP API client core.
//!
//! # Overview
//! Issues JSON requests with per-attempt timeouts, linear retry backoff and
//! cache-key based cancellation, and exposes results through a
//! framework-agnostic subscribe/refetch binding that UI layers adapt.
//!
//! # Design
//! - `ApiClient` is the verb facade; `Executor` is the only component that
//!   classifies failures and decides what is retried.
//! - `CancellationRegistry` is owned per client, never global.
//! - The network sits behind the `Transport` trait; `ReqwestTransport` is the
//!   production implementation and tests inject scripted ones.
//! - `envelope` holds the `{data|error, success, status}` shapes shared with
//!   the server crate.
//! - Library code logs through `tracing` and never installs a subscriber.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod http;
pub mod query;
pub mod registry;

pub use client::ApiClient;
pub use config::{ApiConfig, RequestOptions};
pub use envelope::{error_response, paginated_response, success_response, ApiResponse, PaginatedResponse, Pagination};
pub use error::{ApiError, ConfigError, ErrorKind, TransportError};
pub use executor::Failure;
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use query::{FocusEvents, Query, QueryOptions, QueryState, QueryStatus, Subscription};
pub use registry::{CancelHandle, CancelReason, CancellationRegistry};
pub use tokio_util::sync::CancellationToken;
