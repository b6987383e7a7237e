//! Admin HTTP endpoints with Axum

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::rooms::RoomSummary;
use crate::server::Hub;
use crate::stats::StatsSnapshot;
use crate::types::HubResult;

/// Body of `GET /stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub rooms: usize,
    pub bytes_total: String,
}

/// Create the admin router
pub fn create_router(hub: Hub) -> Router {
    // Read-only endpoints; any origin may poll them
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/rooms", get(list_rooms))
        .layer(cors)
        .with_state(hub)
}

/// Bind `addr` and serve the admin router in a background task
pub async fn serve_admin(addr: &str, hub: Hub) -> HubResult<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "admin endpoint listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, create_router(hub)).await {
            tracing::error!(error = %e, "admin server stopped");
        }
    }))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn get_stats(State(hub): State<Hub>) -> Json<StatsResponse> {
    let stats = hub.stats().snapshot();
    Json(StatsResponse {
        bytes_total: StatsSnapshot::format_size(stats.total_bytes()),
        rooms: hub.rooms().room_count(),
        stats,
    })
}

async fn list_rooms(State(hub): State<Hub>) -> Json<Vec<RoomSummary>> {
    Json(hub.rooms().summaries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use crate::config::HubConfig;

    fn hub() -> Hub {
        Hub::new(HubConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(hub());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let hub = hub();
        hub.stats().bytes_received(2048);
        let app = create_router(hub);

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["bytes_in"], 2048);
        assert_eq!(json["bytes_total"], "2.00 KB");
        assert_eq!(json["rooms"], 0);
    }

    #[tokio::test]
    async fn test_rooms_endpoint_empty() {
        let app = create_router(hub());
        let response = app
            .oneshot(Request::builder().uri("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"[]");
    }
}
