//! Request execution: timeout, cancellation, classification and retry.
//!
//! # Design
//! One call to `Executor::execute` is one logical request. If it carries a
//! cache key, a fresh `CancelHandle` is registered before the first attempt;
//! registration synchronously cancels any predecessor under the same key.
//! The handle stays registered across every attempt and backoff wait, and a
//! guard deregisters it however the request ends, including when the caller
//! drops the future.
//!
//! Every failed attempt is classified once into a `Failure`. Retry decisions
//! and error surfacing switch on that variant only:
//!
//! | Failure      | Retried | Surfaced as                     |
//! |--------------|---------|---------------------------------|
//! | `Cancelled`  | no      | `Cancelled` / `Superseded`      |
//! | `TimedOut`   | no      | status 0, "Request timed out"   |
//! | `Client`     | no      | 4xx status, server message/code |
//! | `Server`     | yes     | last status, server message     |
//! | `Network`    | yes     | status 0                        |
//!
//! Backoff is linear: the wait after attempt `n` (1-indexed) is
//! `retry_delay * n`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ErrorKind, TransportError};
use crate::http::{status_text, HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::registry::{CancelHandle, CancelReason, CancellationRegistry};

/// Classification of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Cancelled(CancelReason),
    TimedOut,
    Client { status: u16, body: String },
    Server { status: u16, body: String },
    Network(String),
}

impl Failure {
    pub fn classify(result: Result<HttpResponse, TransportError>) -> Result<HttpResponse, Failure> {
        match result {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) if (400..500).contains(&response.status) => Err(Failure::Client {
                status: response.status,
                body: response.body,
            }),
            Ok(response) => Err(Failure::Server {
                status: response.status,
                body: response.body,
            }),
            Err(err) => Err(Failure::Network(err.0)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Server { .. } | Failure::Network(_))
    }

    pub fn into_error(self) -> ApiError {
        match self {
            Failure::Cancelled(CancelReason::Explicit) => ApiError::cancelled(),
            Failure::Cancelled(CancelReason::Superseded) => ApiError::superseded(),
            Failure::TimedOut => ApiError::timeout(),
            Failure::Client { status, body } => error_from_body(status, &body).with_kind(ErrorKind::Client),
            Failure::Server { status, body } => error_from_body(status, &body).with_kind(ErrorKind::Server),
            Failure::Network(detail) => ApiError::network(detail),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

/// Build an error from a non-success body, falling back to the status line
/// when the body carries no message.
fn error_from_body(status: u16, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone().or_else(|| b.error.clone()))
        .unwrap_or_else(|| format!("HTTP {status}: {}", status_text(status)));
    let err = ApiError::new(status, message);
    match parsed.and_then(|b| b.code) {
        Some(code) => err.with_code(code),
        None => err,
    }
}

/// Deregisters a cache-key handle when the request settles or is dropped.
struct Registration<'a> {
    registry: &'a CancellationRegistry,
    key: &'a str,
    handle: CancelHandle,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.resolve(self.key, &self.handle);
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    registry: Arc<CancellationRegistry>,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<CancellationRegistry>) -> Self {
        Self { transport, registry }
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<String>,
        settings: Settings,
    ) -> Result<ApiResponse<T>, ApiError> {
        let request = HttpRequest {
            method,
            url,
            headers: settings.headers.into_iter().collect(),
            body,
        };

        let handle = CancelHandle::new();
        // Register before the first suspension point so a newer request for
        // the same key can never race this one.
        let _registration = settings.cache_key.as_deref().map(|key| {
            self.registry.register(key, handle.clone());
            Registration {
                registry: &self.registry,
                key,
                handle: handle.clone(),
            }
        });

        let mut last_error = None;
        for attempt in 0..=settings.retries {
            let failure = match self.attempt(&request, settings.timeout, &handle).await {
                Ok(response) => return decode(response),
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                tracing::debug!(method = %request.method, url = %request.url, ?failure, "request failed");
                return Err(failure.into_error());
            }

            let err = failure.into_error();
            if attempt < settings.retries {
                let delay = backoff(settings.retry_delay, attempt);
                tracing::warn!(
                    method = %request.method,
                    url = %request.url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying request"
                );
                tokio::select! {
                    biased;
                    _ = handle.cancelled() => return Err(cancellation(&handle)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            last_error = Some(err);
        }

        let err = last_error.unwrap_or_else(ApiError::max_retries_exceeded);
        tracing::warn!(method = %request.method, url = %request.url, error = %err, "retries exhausted");
        Err(err)
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        timeout: Duration,
        handle: &CancelHandle,
    ) -> Result<HttpResponse, Failure> {
        if let Some(reason) = handle.reason() {
            return Err(Failure::Cancelled(reason));
        }
        // Child token: cancelled by the handle, or by us when the timer wins.
        let attempt_token: CancellationToken = handle.token().child_token();
        let send = self.transport.send(request.clone(), attempt_token.clone());

        tokio::select! {
            biased;
            _ = handle.cancelled() => Err(Failure::Cancelled(handle.reason().unwrap_or(CancelReason::Explicit))),
            result = send => Failure::classify(result),
            _ = tokio::time::sleep(timeout) => {
                attempt_token.cancel();
                tracing::warn!(url = %request.url, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(Failure::TimedOut)
            }
        }
    }
}

/// Linear backoff before retry `attempt + 1`, saturating instead of overflowing.
fn backoff(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay.checked_mul(attempt + 1).unwrap_or(Duration::MAX)
}

fn cancellation(handle: &CancelHandle) -> ApiError {
    Failure::Cancelled(handle.reason().unwrap_or(CancelReason::Explicit)).into_error()
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<ApiResponse<T>, ApiError> {
    let body = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(body)
        .map(|data| ApiResponse::success(data, response.status))
        .map_err(|e| ApiError::decode(response.status, e))
}
