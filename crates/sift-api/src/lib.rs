//! sift-api — HTTP surface for research tasks and the live relay.

pub mod handlers;

use std::future::Future;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// The full application: `/api` routes plus CORS.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/research/tasks",
            post(handlers::handle_create_task).get(handlers::handle_list_tasks),
        )
        .route("/research/tasks/{task_id}", get(handlers::handle_get_task))
        .route(
            "/research/tasks/{task_id}/events",
            post(handlers::handle_task_events),
        )
        .route("/research/stream", post(handlers::handle_stream))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(
    state: ApiState,
    bind: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
