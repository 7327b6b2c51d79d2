use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        chain_webhook, create_session, current_rate, get_session_status, health_check,
        list_dead_letters, payment_webhook, AppState,
    },
    middleware::{rate_limit_middleware, SessionRateLimit},
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // Session creation is the only endpoint anonymous clients can use to
    // create state, so it gets its own limiter.
    let session_limit = Arc::new(SessionRateLimit::new(30, 60));

    let session_routes = Router::new()
        .route("/session", post(create_session))
        .route_layer(from_fn_with_state(session_limit, rate_limit_middleware));

    let api = Router::new()
        .merge(session_routes)
        .route("/session/:id", get(get_session_status))
        .route("/rate", get(current_rate))
        .route("/admin/dead-letters", get(list_dead_letters));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/webhook/chain", post(chain_webhook))
        .route("/webhook/payment", post(payment_webhook))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::very_permissive()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
