//! Envelope-wrapping axum server and the demo API the client is tested against.
//!
//! # Design
//! Every route answers through `ApiReply`, so success and failure share one
//! JSON envelope shape, carry `Cache-Control: no-store, max-age=0`, and never
//! leak internal error text. Besides an in-memory users resource, the router
//! exposes fault-injection routes (`/flaky`, `/slow`, `/boom`) that exercise
//! the client's retry, timeout and error-mapping paths.

pub mod handler;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_client::{paginated_response, success_response, ApiError, ApiResponse, PaginatedResponse};
use axum::{
    extract::{Request, State},
    middleware,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub use handler::{create_api_handler, no_store, ApiJson, ApiPath, ApiQuery, ApiReply, Envelope};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

const DEFAULT_PAGE_LIMIT: u64 = 10;

#[derive(Clone, Default)]
pub struct AppState {
    users: Arc<RwLock<Vec<User>>>,
    flaky_hits: Arc<AtomicU32>,
}

fn not_found(id: &str) -> anyhow::Error {
    ApiError::new(404, format!("User {id} not found"))
        .with_code("USER_NOT_FOUND")
        .into()
}

fn validate(input: &CreateUser) -> anyhow::Result<()> {
    if input.name.trim().is_empty() || !input.email.contains('@') {
        return Err(ApiError::new(400, "A name and a valid email are required")
            .with_code("VALIDATION_ERROR")
            .into());
    }
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).put(replace_user).patch(update_user).delete(delete_user),
        )
        .route("/flaky/{failures}", get(flaky))
        .route("/slow/{ms}", get(slow))
        .route("/health", get(create_api_handler(health)))
        .route("/boom", get(create_api_handler(boom)))
        .fallback(create_api_handler(route_not_found))
        .layer(middleware::map_response(no_store))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_users(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiReply<PaginatedResponse<User>> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if page == 0 || limit == 0 {
        return ApiReply(Err(ApiError::new(400, "page and limit must be positive")
            .with_code("VALIDATION_ERROR")
            .into()));
    }
    let users = state.users.read().await;
    let offset = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
    let items = users
        .iter()
        .skip(offset)
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .cloned()
        .collect();
    ApiReply(Ok(paginated_response(items, page, limit, users.len() as u64)))
}

async fn create_user(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateUser>,
) -> ApiReply<ApiResponse<User>> {
    let result = validate(&input).map(|()| User {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        email: input.email,
    });
    let result = match result {
        Ok(user) => {
            state.users.write().await.push(user.clone());
            tracing::info!(id = %user.id, "user created");
            Ok(ApiResponse::success(user, 201).with_message("User created"))
        }
        Err(err) => Err(err),
    };
    result.into()
}

async fn get_user(State(state): State<AppState>, ApiPath(id): ApiPath<String>) -> ApiReply<ApiResponse<User>> {
    let user = state.users.read().await.iter().find(|u| u.id == id).cloned();
    user.map(success_response).ok_or_else(|| not_found(&id)).into()
}

async fn replace_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<CreateUser>,
) -> ApiReply<ApiResponse<User>> {
    if let Err(err) = validate(&input) {
        return ApiReply(Err(err));
    }
    let mut users = state.users.write().await;
    let result = match users.iter_mut().find(|u| u.id == id) {
        Some(user) => {
            user.name = input.name;
            user.email = input.email;
            Ok(success_response(user.clone()))
        }
        None => Err(not_found(&id)),
    };
    result.into()
}

async fn update_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<UpdateUser>,
) -> ApiReply<ApiResponse<User>> {
    let mut users = state.users.write().await;
    let result = match users.iter_mut().find(|u| u.id == id) {
        Some(user) => {
            if let Some(name) = input.name {
                user.name = name;
            }
            if let Some(email) = input.email {
                user.email = email;
            }
            Ok(success_response(user.clone()))
        }
        None => Err(not_found(&id)),
    };
    result.into()
}

async fn delete_user(State(state): State<AppState>, ApiPath(id): ApiPath<String>) -> ApiReply<ApiResponse<()>> {
    let mut users = state.users.write().await;
    let before = users.len();
    users.retain(|u| u.id != id);
    let result = if users.len() < before {
        Ok(success_response(()).with_message("User deleted"))
    } else {
        Err(not_found(&id))
    };
    result.into()
}

/// Answers 503 for the first `failures` hits, then 200 with the hit count.
async fn flaky(State(state): State<AppState>, ApiPath(failures): ApiPath<u32>) -> ApiReply<ApiResponse<u32>> {
    let hit = state.flaky_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= failures {
        return ApiReply(Err(ApiError::new(503, "Service temporarily unavailable").into()));
    }
    ApiReply(Ok(success_response(hit)))
}

async fn slow(ApiPath(ms): ApiPath<u64>) -> ApiReply<ApiResponse<u64>> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    ApiReply(Ok(success_response(ms)))
}

async fn health(_request: Request) -> anyhow::Result<ApiResponse<&'static str>> {
    Ok(success_response("ok"))
}

async fn boom(_request: Request) -> anyhow::Result<ApiResponse<()>> {
    anyhow::bail!("db down")
}

async fn route_not_found(request: Request) -> anyhow::Result<ApiResponse<()>> {
    Err(ApiError::new(404, format!("No route for {} {}", request.method(), request.uri().path()))
        .with_code("ROUTE_NOT_FOUND")
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_to_json() {
        let user = User {
            id: "42".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], "42");
        assert_eq!(json["name"], "Ada");
        assert_eq!(json["email"], "ada@example.com");
    }

    #[test]
    fn create_user_rejects_missing_email() {
        let result: Result<CreateUser, _> = serde_json::from_str(r#"{"name":"Ada"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_user_all_fields_optional() {
        let input: UpdateUser = serde_json::from_str(r#"{}"#).unwrap();
        assert!(input.name.is_none());
        assert!(input.email.is_none());
    }

    #[test]
    fn validation_rejects_blank_name_and_bad_email() {
        let blank = CreateUser {
            name: " ".to_string(),
            email: "a@b.c".to_string(),
        };
        assert!(validate(&blank).is_err());
        let bad_email = CreateUser {
            name: "Ada".to_string(),
            email: "nope".to_string(),
        };
        let err = validate(&bad_email).unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, 400);
        assert_eq!(api.code.as_deref(), Some("VALIDATION_ERROR"));
    }
}
