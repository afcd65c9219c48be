//! Loopback admin API over the running services.
//!
//! Every route sits behind bearer-token auth; the token is hot-swappable so
//! a config reload can rotate it.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::Services;

#[derive(Clone)]
pub struct AdminState {
    pub services: Arc<Services>,
    pub api_key: Arc<ArcSwap<String>>,
}

impl AdminState {
    pub fn new(services: Arc<Services>, api_key: impl Into<String>) -> Self {
        Self {
            services,
            api_key: Arc::new(ArcSwap::from_pointee(api_key.into())),
        }
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.api_key.store(Arc::new(api_key.into()));
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/network", get(get_network))
        .route("/admin/network/stats", get(get_network_stats))
        .route("/admin/network/probe", post(post_probe))
        .route("/admin/network/failover", post(post_failover))
        .route("/admin/networks", get(list_networks).post(add_network))
        .route("/admin/networks/{id}", delete(remove_network))
        .route("/admin/networks/{id}/priority", put(update_network_priority))
        .route("/admin/queue", get(get_queue).post(enqueue_request).delete(clear_queue))
        .route("/admin/queue/{id}", get(get_request).delete(cancel_request))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::LinkguardConfig;
    use crate::connectivity::{AttachmentType, ManualSource, NetworkState};
    use crate::failover::ManualAttacher;
    use crate::lifecycle::Collaborators;
    use crate::storage::{MemoryCredentialStore, MemoryStore};
    use crate::transport::{CallError, CallResponse, CallTarget, Transport};

    const KEY: &str = "test-key";

    /// Never answers, so queued work stays queued while the test looks at it.
    struct Hang;

    #[async_trait]
    impl Transport for Hang {
        async fn call(&self, _: &CallTarget, _: Duration) -> Result<CallResponse, CallError> {
            std::future::pending().await
        }
    }

    async fn state(online: bool) -> AdminState {
        let initial = if online {
            NetworkState::online(AttachmentType::Wifi)
        } else {
            NetworkState::disconnected()
        };
        let mut config = LinkguardConfig::default();
        config.failover.auto_failover = false;
        let services = Services::start(
            &config,
            Collaborators {
                kv: Arc::new(MemoryStore::new()),
                credentials: Arc::new(MemoryCredentialStore::new()),
                transport: Arc::new(Hang),
                attacher: Arc::new(ManualAttacher),
                source: Some(Arc::new(ManualSource::new(initial))),
            },
        )
        .await
        .unwrap();
        AdminState::new(Arc::new(services), KEY)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {KEY}"));
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_token() {
        let state = state(true).await;
        let app = setup_admin_router(state.clone());

        let bare = Request::builder().uri("/admin/status").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(bare).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/admin/status")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(wrong).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Rotated key takes effect without rebuilding the router
        state.set_api_key("rotated");
        let response = app.oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_and_network() {
        let app = setup_admin_router(state(true).await);

        let response = app.clone().oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["reachable"], true);
        assert_eq!(body["quality"], "good");

        let response = app.clone().oneshot(request("GET", "/admin/network", None)).await.unwrap();
        let body = json(response).await;
        assert_eq!(body["state"]["attachment"], "wifi");

        let response = app.oneshot(request("GET", "/admin/network/stats", None)).await.unwrap();
        let body = json(response).await;
        assert_eq!(body["total_samples"], 1);
    }

    #[tokio::test]
    async fn test_network_crud() {
        let app = setup_admin_router(state(true).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/admin/networks",
                Some(serde_json::json!({"name": "Hotspot", "secret": "hunter2", "priority_rank": 3})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json(response).await;
        assert_eq!(created["secure"], true);
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/admin/networks/{id}/priority"),
                Some(serde_json::json!({"priority_rank": 9})),
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await["priority_rank"], 9);

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/networks", Some(serde_json::json!({"name": "  "}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/admin/networks/{id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/admin/networks/{id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(request("GET", "/admin/networks", None)).await.unwrap();
        assert_eq!(json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_queue_routes() {
        // Offline, so nothing is dispatched while we inspect the queue
        let app = setup_admin_router(state(false).await);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/admin/queue",
                Some(serde_json::json!({
                    "target": {"url": "http://example.invalid/a"},
                    "priority": "high",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/admin/queue/{id}"), None))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["priority"], "high");
        assert_eq!(body["status"], "pending");

        let response = app.clone().oneshot(request("GET", "/admin/queue", None)).await.unwrap();
        let body = json(response).await;
        assert_eq!(body["status"]["total"], 1);
        assert_eq!(body["requests"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/admin/queue/{id}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/queue/not-a-uuid", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(request("DELETE", "/admin/queue", None)).await.unwrap();
        assert_eq!(json(response).await["cleared"], 0);
    }

    #[tokio::test]
    async fn test_failover_without_backups() {
        let app = setup_admin_router(state(false).await);
        let response = app
            .oneshot(request("POST", "/admin/network/failover", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
