use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admin::AdminState;
use crate::connectivity::QualityClass;
use crate::dispatch::{PendingRequest, PriorityTier, QueueStatus, RequestMetadata};
use crate::networks::NetworkStoreError;
use crate::transport::CallTarget;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub reachable: bool,
    pub quality: QualityClass,
    pub is_switching: bool,
    pub backup_networks: usize,
    pub queued_requests: usize,
}

#[derive(Deserialize)]
pub struct AddNetworkRequest {
    pub name: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub priority_rank: i32,
}

#[derive(Deserialize)]
pub struct PriorityUpdate {
    pub priority_rank: i32,
}

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub target: CallTarget,
    #[serde(default)]
    pub priority: PriorityTier,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

#[derive(Serialize)]
pub struct QueueListing {
    pub status: QueueStatus,
    pub requests: Vec<PendingRequest>,
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| (StatusCode::BAD_REQUEST, "Invalid id").into_response())
}

fn network_error(e: NetworkStoreError) -> Response {
    match e {
        NetworkStoreError::NotFound(_) => (StatusCode::NOT_FOUND, "Backup network not found").into_response(),
        NetworkStoreError::InvalidName => (StatusCode::BAD_REQUEST, "Network name must not be empty").into_response(),
        other => {
            tracing::error!("Backup network operation failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Backup network operation failed").into_response()
        }
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let services = &state.services;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        reachable: services.monitor.is_reachable(),
        quality: services.monitor.quality(),
        is_switching: services.monitor.is_switching(),
        backup_networks: services.networks.len(),
        queued_requests: services.dispatcher.len(),
    })
}

pub async fn get_network(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.monitor.current())
}

pub async fn get_network_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.monitor.statistics())
}

pub async fn post_probe(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.monitor.force_probe().await)
}

/// Starts a failover run in the background; poll `/admin/network` for the result.
pub async fn post_failover(State(state): State<AdminState>) -> impl IntoResponse {
    if state.services.monitor.is_switching() {
        return (StatusCode::CONFLICT, "Failover already in progress").into_response();
    }

    let monitor = state.services.monitor.clone();
    tokio::spawn(async move {
        let outcome = monitor.trigger_failover().await;
        tracing::info!(outcome = outcome.label(), "Admin-requested failover finished");
    });
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "started" }))).into_response()
}

pub async fn list_networks(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.services.networks.list())
}

pub async fn add_network(
    State(state): State<AdminState>,
    Json(request): Json<AddNetworkRequest>,
) -> impl IntoResponse {
    match state
        .services
        .networks
        .add(&request.name, request.secret.as_deref(), request.priority_rank)
    {
        Ok(network) => (StatusCode::CREATED, Json(network)).into_response(),
        Err(e) => network_error(e),
    }
}

pub async fn remove_network(State(state): State<AdminState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.services.networks.remove(&id) {
        Ok(network) => Json(network).into_response(),
        Err(e) => network_error(e),
    }
}

pub async fn update_network_priority(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(update): Json<PriorityUpdate>,
) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.services.networks.update_priority(&id, update.priority_rank) {
        Ok(network) => Json(network).into_response(),
        Err(e) => network_error(e),
    }
}

pub async fn get_queue(State(state): State<AdminState>) -> Json<QueueListing> {
    let dispatcher = &state.services.dispatcher;
    Json(QueueListing {
        status: dispatcher.queue_status(),
        requests: dispatcher.list(),
    })
}

pub async fn enqueue_request(
    State(state): State<AdminState>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    if request.target.url.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Target url must not be empty").into_response();
    }
    let id = state
        .services
        .dispatcher
        .enqueue(request.target, request.priority, request.metadata);
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "id": id }))).into_response()
}

pub async fn clear_queue(State(state): State<AdminState>) -> impl IntoResponse {
    let cleared = state.services.dispatcher.clear();
    Json(serde_json::json!({ "cleared": cleared }))
}

pub async fn get_request(State(state): State<AdminState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.services.dispatcher.request_status(&id) {
        Some(request) => Json(request).into_response(),
        None => (StatusCode::NOT_FOUND, "Request not found").into_response(),
    }
}

pub async fn cancel_request(State(state): State<AdminState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.services.dispatcher.cancel(&id) {
        Some(request) => Json(request).into_response(),
        None => (StatusCode::NOT_FOUND, "Request not found").into_response(),
    }
}
