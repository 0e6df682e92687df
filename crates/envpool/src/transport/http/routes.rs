//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Form, FromRequest, Query, Request, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::record::{AvailableEntry, NewResource};
use crate::service::{
    BatchItem, BatchRegistered, ClaimOutcome, ClaimedLease, PoolService, PoolStatus, Released,
};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = match &self {
            PoolError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PoolError::DuplicateResource(_) => StatusCode::CONFLICT,
            PoolError::LeaseNotFound => StatusCode::NOT_FOUND,
            PoolError::StorageFailure(e) => {
                tracing::error!(error = %e, "Storage failure while serving request");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save pool data");
            }
        };
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct AddResponse {
    pub success: bool,
    pub message: &'static str,
    pub env: AvailableEntry,
    pub total_available: usize,
}

#[derive(Debug, Deserialize)]
pub struct AddManyRequest {
    #[serde(default)]
    pub environments: Vec<NewResource>,
}

#[derive(Debug, Serialize)]
pub struct AddManyItem {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<BatchItem> for AddManyItem {
    fn from(item: BatchItem) -> Self {
        let error = item.result.err().map(|e| e.to_string());
        Self {
            url: item.url,
            success: error.is_none(),
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddManyResponse {
    pub success: bool,
    pub message: String,
    pub added: usize,
    pub total_available: usize,
    pub results: Vec<AddManyItem>,
}

impl From<BatchRegistered> for AddManyResponse {
    fn from(batch: BatchRegistered) -> Self {
        Self {
            success: true,
            message: format!("Added {} environments to pool", batch.added),
            added: batch.added,
            total_available: batch.available_count,
            results: batch.items.into_iter().map(AddManyItem::from).collect(),
        }
    }
}

/// Credentials and lease details handed to the claiming client.
#[derive(Debug, Serialize)]
pub struct ClaimedEnv {
    pub url: String,
    pub username: String,
    pub password: String,
    pub version: String,
    pub resources: String,
    pub lease_id: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<ClaimedLease> for ClaimedEnv {
    fn from(claimed: ClaimedLease) -> Self {
        let record = claimed.lease.record;
        Self {
            url: record.url,
            username: record.username,
            password: record.password,
            version: record.version,
            resources: record.resources,
            lease_id: claimed.lease.lease_id.to_string(),
            claimed_at: claimed.lease.claimed_at,
            expires_at: claimed.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub env: ClaimedEnv,
    pub remaining: usize,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ExhaustedResponse {
    pub success: bool,
    pub error: &'static str,
    pub available_count: usize,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseQuery {
    #[serde(default, alias = "user_id")]
    pub lease_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReleasedEnv {
    pub url: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub success: bool,
    pub message: &'static str,
    pub released_env: ReleasedEnv,
    pub available_count: usize,
}

impl From<Released> for ReleaseResponse {
    fn from(released: Released) -> Self {
        Self {
            success: true,
            message: "Environment released back to pool",
            released_env: ReleasedEnv {
                url: released.url,
                version: released.version,
            },
            available_count: released.available_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub pool_status: PoolStatus,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Accepts either a JSON body or a urlencoded form, keyed on content type.
async fn parse_new_resource(request: Request) -> Result<NewResource, Response> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        Json::<NewResource>::from_request(request, &())
            .await
            .map(|Json(body)| body)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))
    } else {
        Form::<NewResource>::from_request(request, &())
            .await
            .map(|Form(body)| body)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))
    }
}

async fn add_env(State(service): State<Arc<PoolService>>, request: Request) -> Response {
    let input = match parse_new_resource(request).await {
        Ok(input) => input,
        Err(response) => return response,
    };

    match service.register(input).await {
        Ok(registered) => Json(AddResponse {
            success: true,
            message: "Environment added to pool",
            env: registered.entry,
            total_available: registered.available_count,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn add_many_envs(State(service): State<Arc<PoolService>>, request: Request) -> Response {
    let body = match Json::<AddManyRequest>::from_request(request, &()).await {
        Ok(Json(body)) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match service.register_many(body.environments).await {
        Ok(batch) => Json(AddManyResponse::from(batch)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn claim_env(State(service): State<Arc<PoolService>>) -> Response {
    match service.claim().await {
        Ok(ClaimOutcome::Claimed(claimed)) => {
            let remaining = claimed.remaining;
            Json(ClaimResponse {
                success: true,
                env: claimed.into(),
                remaining,
                message: "Environment claimed successfully",
            })
            .into_response()
        }
        Ok(ClaimOutcome::Exhausted) => (
            StatusCode::NOT_FOUND,
            Json(ExhaustedResponse {
                success: false,
                error: "No environments available",
                available_count: 0,
                message: "All environments are currently in use",
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn release_env(
    State(service): State<Arc<PoolService>>,
    Query(query): Query<ReleaseQuery>,
) -> Response {
    let lease_id = query.lease_id.unwrap_or_default();
    match service.release(&lease_id).await {
        Ok(released) => Json(ReleaseResponse::from(released)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn pool_status(State(service): State<Arc<PoolService>>) -> Response {
    match service.status().await {
        Ok(pool_status) => Json(StatusResponse {
            success: true,
            pool_status,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn test_api(State(service): State<Arc<PoolService>>) -> Json<TestResponse> {
    Json(TestResponse {
        success: true,
        message: "Environment Pool API is working!",
        timestamp: service.now(),
        version: service.version().label(),
    })
}

async fn shutdown(State(service): State<Arc<PoolService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

/// Browser clients call the API cross-origin; any origin may.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn routes(service: Arc<PoolService>) -> Router {
    Router::new()
        .route("/api/add", post(add_env))
        .route("/api/add-multiple", post(add_many_envs))
        .route("/api/claim", get(claim_env))
        .route("/api/release", get(release_env))
        .route("/api/status", get(pool_status))
        .route("/api/test", get(test_api))
        .route("/shutdown", post(shutdown))
        .layer(cors())
        .with_state(service)
}
