//! Operator health HTTP endpoint (§4.9, §6 Operator surface), grounded on
//! `tftio-gator`'s axum/tower/tower-http router shape.
//!
//! `GET /health` returns the engine's `HealthReport` as JSON; HTTP 200 when
//! `status=ok`, 503 otherwise — callers (load balancers, orchestrators)
//! never need to parse the body to know whether to route traffic here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use flow_core::health::{HealthAggregator, HealthStatus};
use flow_core::queue::QueueBackend;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

struct AppState<Q: QueueBackend + 'static> {
    aggregator: Arc<HealthAggregator<Q>>,
}

// Written by hand rather than `#[derive(Clone)]`: the derive macro adds a
// `Q: Clone` bound even though `Arc<HealthAggregator<Q>>` never needs one,
// which would wrongly require queue backends (e.g. `RedisQueueBackend`) to
// implement `Clone` just to serve `/health`.
impl<Q: QueueBackend + 'static> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self { aggregator: Arc::clone(&self.aggregator) }
    }
}

pub fn build_router<Q: QueueBackend + 'static>(aggregator: Arc<HealthAggregator<Q>>) -> Router {
    Router::new()
        .route("/health", get(health::<Q>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { aggregator })
}

async fn health<Q: QueueBackend + 'static>(State(state): State<AppState<Q>>) -> impl IntoResponse {
    let report = state.aggregator.check().await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded | HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// Binds and serves forever; the root binary spawns this alongside the
/// worker/orchestrator/enqueuer loops.
pub async fn serve<Q: QueueBackend + 'static>(
    aggregator: Arc<HealthAggregator<Q>>,
    bind: &str,
    port: u16,
) -> std::io::Result<()> {
    let app = build_router(aggregator);
    let addr: SocketAddr = format!("{bind}:{port}").parse().expect("invalid health bind address");
    tracing::info!(%addr, "health endpoint listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flow_core::queue::InMemoryQueueBackend;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_ok_when_no_dependencies_are_down() {
        let backend = Arc::new(InMemoryQueueBackend::new());
        let aggregator = Arc::new(HealthAggregator::new(backend, vec![]));
        let app = build_router(aggregator);

        let response =
            app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
