//! End-to-end client tests against the live server.
//!
//! # Design
//! Starts the server on a random port inside the test runtime, then drives
//! it over real HTTP through `ReqwestTransport`. Server routes answer with
//! JSON envelopes, so success payloads decode as `ApiResponse<T>`.

use std::time::Duration;

use api_client::{ApiClient, ApiConfig, ApiResponse, ErrorKind, PaginatedResponse, RequestOptions};
use api_server::User;
use serde_json::json;

async fn start_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(api_server::run(listener));
    format!("http://{addr}")
}

fn client(base_url: &str) -> ApiClient {
    let config = ApiConfig::new(base_url)
        .retries(2)
        .retry_delay(Duration::from_millis(10))
        .timeout(Duration::from_secs(5));
    ApiClient::with_reqwest(config)
}

#[tokio::test]
async fn crud_lifecycle() {
    let client = client(&start_server().await);
    let opts = RequestOptions::new;

    // Step 1: create.
    let created = client
        .post::<ApiResponse<User>, _>("/users", &json!({"name": "Ada", "email": "ada@example.com"}), opts())
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let user = created.into_data().and_then(|e| e.into_data()).unwrap();
    assert_eq!(user.name, "Ada");
    let path = format!("/users/{}", user.id);

    // Step 2: get.
    let fetched = client.get::<ApiResponse<User>>(&path, &[], opts()).await.unwrap();
    assert_eq!(fetched.data().and_then(|e| e.data()), Some(&user));

    // Step 3: patch one field.
    let patched = client
        .patch::<ApiResponse<User>, _>(&path, &json!({"email": "ada@lovelace.dev"}), opts())
        .await
        .unwrap();
    let patched = patched.into_data().and_then(|e| e.into_data()).unwrap();
    assert_eq!(patched.name, "Ada");
    assert_eq!(patched.email, "ada@lovelace.dev");

    // Step 4: replace.
    let replaced = client
        .put::<ApiResponse<User>, _>(&path, &json!({"name": "Grace", "email": "grace@example.com"}), opts())
        .await
        .unwrap();
    assert_eq!(replaced.data().and_then(|e| e.data()).map(|u| u.name.as_str()), Some("Grace"));

    // Step 5: delete.
    let deleted = client.delete::<ApiResponse<()>>(&path, opts()).await.unwrap();
    assert_eq!(deleted.data().and_then(|e| e.message()), Some("User deleted"));

    // Step 6: get after delete: 404 with server code, single attempt.
    let err = client.get::<ApiResponse<User>>(&path, &[], opts()).await.unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.kind, ErrorKind::Client);
    assert_eq!(err.code.as_deref(), Some("USER_NOT_FOUND"));
    assert_eq!(err.message, format!("User {} not found", user.id));
}

#[tokio::test]
async fn paginated_listing_decodes() {
    let client = client(&start_server().await);
    for name in ["a", "b", "c"] {
        client
            .post::<ApiResponse<User>, _>(
                "/users",
                &json!({"name": name, "email": format!("{name}@example.com")}),
                RequestOptions::new(),
            )
            .await
            .unwrap();
    }

    let page = client
        .get::<PaginatedResponse<User>>("/users", &[("page", "2"), ("limit", "2")], RequestOptions::new())
        .await
        .unwrap()
        .into_data()
        .unwrap();

    assert_eq!(page.items().len(), 1);
    assert_eq!(page.items()[0].name, "c");
    assert_eq!(page.pagination().total(), 3);
    assert_eq!(page.pagination().total_pages(), 2);
    assert!(page.pagination().has_prev());
    assert!(!page.pagination().has_next());
}

#[tokio::test]
async fn flaky_endpoint_recovers_within_retry_budget() {
    let client = client(&start_server().await);

    let response = client
        .get::<ApiResponse<u32>>("/flaky/2", &[], RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.data().and_then(|e| e.data()), Some(&3));
}

#[tokio::test]
async fn flaky_endpoint_exhausts_retries() {
    let client = client(&start_server().await);

    let err = client
        .get::<ApiResponse<u32>>("/flaky/10", &[], RequestOptions::new().retries(1))
        .await
        .unwrap_err();

    assert_eq!(err.status, 503);
    assert_eq!(err.message, "Service temporarily unavailable");
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let client = client(&start_server().await);

    let err = client
        .get::<ApiResponse<u64>>("/slow/2000", &[], RequestOptions::new().timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn internal_errors_reach_client_as_generic_message() {
    let client = client(&start_server().await);

    let err = client
        .get::<ApiResponse<()>>("/boom", &[], RequestOptions::new().retries(0))
        .await
        .unwrap_err();

    assert_eq!(err.status, 500);
    assert_eq!(err.message, "Internal server error");
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(&format!("http://{addr}"));

    let err = client
        .get::<ApiResponse<()>>("/health", &[], RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.status, 0);
    assert!(err.is_network_error());
}
