//! Hubfleet Control - Member Cluster Lifecycle Service
//!
//! This is the main entry point for the cluster lifecycle service.
//! It registers member clusters with the hub control plane and keeps the
//! cluster registry in step with their memberships.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//!
//! ## Clusters
//! - `GET /v1/clusters` - List clusters (`query`, `page`, `page_size`)
//! - `POST /v1/clusters` - Join and register a cluster
//! - `POST /v1/clusters/cloud` - Join and register a cloud provider cluster
//! - `GET /v1/clusters/:name` - Get a cluster with its resource snapshot
//! - `PUT /v1/clusters/:name` - Modify a cluster
//! - `DELETE /v1/clusters/:name` - Detach and remove a cluster
//! - `POST /v1/clusters/:name/namespaces` - Create a namespace in a cluster

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hubfleet_control::{
    CloudCluster, ClusterLifecycle, ClusterLifecycleService, ClusterName, ClusterQuery,
    ControlConfig, ControlError, CreateClusterRequest, CreateNamespaceRequest,
    ModifyClusterRequest,
};
use hubfleet_membership::{KubeGateway, MembershipConfig};
use hubfleet_store::RocksStore;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    lifecycle: Arc<dyn ClusterLifecycle>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "hubfleet-control",
    })
}

async fn ready_handler(State(_state): State<AppState>) -> impl IntoResponse {
    // The hub cluster is registered before the listener binds.
    (StatusCode::OK, "ready")
}

// ============================================================================
// Cluster Endpoints
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

fn error_response(e: &ControlError) -> Response {
    let status = StatusCode::from_u16(e.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: hubfleet_control::Result<T>, ok: StatusCode) -> Response {
    match result {
        Ok(body) => (ok, Json(body)).into_response(),
        Err(e) => {
            if e.http_status_code() >= 500 {
                tracing::error!(error = %e, code = e.code(), "Cluster operation failed");
            } else {
                tracing::debug!(error = %e, code = e.code(), "Cluster operation rejected");
            }
            error_response(&e)
        }
    }
}

fn parse_name(name: &str) -> Result<ClusterName, Response> {
    ClusterName::new(name).map_err(|e| error_response(&ControlError::from(e)))
}

/// Request body for registering a cloud provider cluster.
#[derive(Debug, Deserialize)]
struct CloudClusterRequest {
    #[serde(flatten)]
    cluster: CreateClusterRequest,
    cloud: CloudCluster,
}

/// GET /v1/clusters
async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ClusterQuery>,
) -> Response {
    respond(state.lifecycle.list_clusters(&query).await, StatusCode::OK)
}

/// POST /v1/clusters
async fn create_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateClusterRequest>,
) -> Response {
    respond(state.lifecycle.create_cluster(req).await, StatusCode::CREATED)
}

/// POST /v1/clusters/cloud
async fn create_cloud_handler(
    State(state): State<AppState>,
    Json(req): Json<CloudClusterRequest>,
) -> Response {
    respond(
        state
            .lifecycle
            .create_provider_cluster(req.cluster, req.cloud)
            .await,
        StatusCode::CREATED,
    )
}

/// GET /v1/clusters/:name
async fn get_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match parse_name(&name) {
        Ok(name) => respond(state.lifecycle.get_cluster(&name).await, StatusCode::OK),
        Err(response) => response,
    }
}

/// PUT /v1/clusters/:name
async fn modify_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ModifyClusterRequest>,
) -> Response {
    match parse_name(&name) {
        Ok(name) => respond(
            state.lifecycle.modify_cluster(&name, req).await,
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

/// DELETE /v1/clusters/:name
async fn delete_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match parse_name(&name) {
        Ok(name) => respond(state.lifecycle.delete_cluster(&name).await, StatusCode::OK),
        Err(response) => response,
    }
}

/// POST /v1/clusters/:name/namespaces
async fn create_namespace_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Response {
    match parse_name(&name) {
        Ok(name) => respond(
            state.lifecycle.create_cluster_namespace(&name, req).await,
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/v1/clusters", get(list_handler).post(create_handler))
        .route("/v1/clusters/cloud", post(create_cloud_handler))
        .route(
            "/v1/clusters/:name",
            get(get_handler).put(modify_handler).delete(delete_handler),
        )
        .route("/v1/clusters/:name/namespaces", post(create_namespace_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hubfleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Hubfleet Control");

    // Load configuration from environment
    let config = ControlConfig::from_env();
    let membership = MembershipConfig::from_env();

    // Initialize store
    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    // Connect to the hub
    let gateway = Arc::new(KubeGateway::new(membership).await?);

    // Registers the hub cluster before any request is served
    let listen_addr = config.listen_addr.clone();
    let lifecycle: Arc<dyn ClusterLifecycle> =
        Arc::new(ClusterLifecycleService::new(store, gateway, config)?);

    let app = create_router(AppState { lifecycle });

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
