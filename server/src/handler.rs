//! Envelope-producing axum handler wrapping.
//!
//! # Design
//! Handlers return `anyhow::Result` of an envelope. `ApiReply` turns that into
//! an HTTP response whose status is the envelope's own `status`, and it
//! always sets `Cache-Control: no-store, max-age=0`. On `Err`, the original
//! error is logged here and then mapped by `error_response`, so only
//! `ApiError` text ever reaches the client.
//!
//! `ApiJson`, `ApiPath` and `ApiQuery` wrap axum's extractors so a rejected
//! body, path or query string answers with the same envelope instead of
//! axum's plain-text rejection. `no_store` is the router-level layer that
//! puts the cache header on responses no handler produced.

use std::future::Future;

use api_client::{error_response, ApiError, ApiResponse, PaginatedResponse};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;

pub const NO_STORE: &str = "no-store, max-age=0";

/// A serializable envelope that knows its HTTP status.
pub trait Envelope: Serialize + Send {
    fn status(&self) -> u16;
}

impl<T: Serialize + Send> Envelope for ApiResponse<T> {
    fn status(&self) -> u16 {
        ApiResponse::status(self)
    }
}

impl<T: Serialize + Send> Envelope for PaginatedResponse<T> {
    fn status(&self) -> u16 {
        PaginatedResponse::status(self)
    }
}

/// Handler outcome rendered as a JSON envelope response.
pub struct ApiReply<E>(pub anyhow::Result<E>);

impl<E> From<anyhow::Result<E>> for ApiReply<E> {
    fn from(result: anyhow::Result<E>) -> Self {
        Self(result)
    }
}

impl<E: Envelope> IntoResponse for ApiReply<E> {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(envelope) => json_response(envelope.status(), &envelope),
            Err(err) => {
                match err.downcast_ref::<ApiError>() {
                    Some(api) => tracing::debug!(status = api.status, error = %api, "handler returned api error"),
                    None => tracing::error!(error = ?err, "handler failed"),
                }
                let envelope: ApiResponse<()> = error_response(&*err);
                json_response(envelope.status(), &envelope)
            }
        }
    }
}

fn json_response<B: Serialize>(status: u16, body: &B) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CACHE_CONTROL, NO_STORE)], Json(body)).into_response()
}

/// Router layer that marks every response, including axum's own, as uncacheable.
pub async fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    response
}

type Rejected = ApiReply<ApiResponse<()>>;

fn rejected(status: StatusCode, code: &str, detail: String) -> Rejected {
    ApiReply(Err(ApiError::new(status.as_u16(), detail).with_code(code).into()))
}

/// JSON body extractor whose rejection is an error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Rejected;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejected(rejection.status(), "INVALID_BODY", rejection.body_text())),
        }
    }
}

/// Path parameter extractor whose rejection is an error envelope.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Rejected;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejected(rejection.status(), "INVALID_PATH", rejection.body_text())),
        }
    }
}

/// Query string extractor whose rejection is an error envelope.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Rejected;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejected(rejection.status(), "INVALID_QUERY", rejection.body_text())),
        }
    }
}

/// Adapt a raw-request handler into an axum handler that always answers
/// with a JSON envelope.
pub fn create_api_handler<F, Fut, E>(
    handler: F,
) -> impl Fn(Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<E>> + Send + 'static,
    E: Envelope + 'static,
{
    move |request: Request| {
        let handler = handler.clone();
        async move { ApiReply(handler(request).await).into_response() }.boxed()
    }
}
