//! Verb-shaped client facade over the request executor.
//!
//! # Design
//! `ApiClient` owns an immutable `ApiConfig`, a `Transport` and its own
//! `CancellationRegistry`. Each verb builds the URL and JSON body, merges
//! per-call `RequestOptions` over the config, and delegates to the
//! `Executor`, which alone decides what is retried. Cloning the client shares
//! the registry, so `cancel_request` on any clone reaches requests started
//! from another.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{ApiConfig, RequestOptions, Settings};
use crate::envelope::ApiResponse;
use crate::error::ApiError;
use crate::executor::Executor;
use crate::http::{HttpMethod, ReqwestTransport, Transport};
use crate::registry::CancellationRegistry;

#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ApiConfig>,
    registry: Arc<CancellationRegistry>,
    executor: Arc<Executor>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("in_flight", &self.registry.len())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: ApiConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(CancellationRegistry::new());
        Self {
            config: Arc::new(config),
            executor: Arc::new(Executor::new(transport, registry.clone())),
            registry,
        }
    }

    pub fn with_reqwest(config: ApiConfig) -> Self {
        Self::new(config, Arc::new(ReqwestTransport::default()))
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// GET with query parameters appended in the given order.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let endpoint = with_query(endpoint, params);
        self.request(HttpMethod::Get, &endpoint, None, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = encode(body)?;
        self.request(HttpMethod::Post, endpoint, Some(body), options).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = encode(body)?;
        self.request(HttpMethod::Put, endpoint, Some(body), options).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = encode(body)?;
        self.request(HttpMethod::Patch, endpoint, Some(body), options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(HttpMethod::Delete, endpoint, None, options).await
    }

    /// Issue a request with an already-encoded body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<String>,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = format!("{}{endpoint}", self.config.base_url);
        let settings = Settings::merge(&self.config, options);
        self.executor.execute(method, url, body, settings).await
    }

    /// Cancel the in-flight request registered under `cache_key`.
    pub fn cancel_request(&self, cache_key: &str) -> bool {
        self.registry.cancel(cache_key)
    }

    pub fn cancel_all_requests(&self) {
        self.registry.cancel_all();
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(ApiError::encode)
}

fn with_query(endpoint: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_keep_order_and_are_encoded() {
        let endpoint = with_query("/users", &[("q", "a b&c"), ("page", "2")]);
        assert_eq!(endpoint, "/users?q=a+b%26c&page=2");
    }

    #[test]
    fn query_params_append_to_existing_query() {
        assert_eq!(with_query("/users?sort=name", &[("page", "1")]), "/users?sort=name&page=1");
        assert_eq!(with_query("/users", &[]), "/users");
    }

    #[test]
    fn client_keeps_trimmed_base_url() {
        let client = ApiClient::with_reqwest(ApiConfig::new("http://localhost:3000/"));
        assert_eq!(client.config().base_url, "http://localhost:3000");
        assert!(client.registry().is_empty());
    }
}
