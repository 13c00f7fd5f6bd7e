use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handlers::{
        get_buyer_payments, get_payment_status, get_seller_payments, health_check,
        refund_unused, register_deposit, report_usage, AppState,
    },
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // The usage report endpoint is the hot, oracle-driven path; cap it
    let usage_rate_limit = Arc::new(RateLimitLayer::new(100, 60));

    let payments = Router::new()
        .route("/deposit", post(register_deposit))
        .route(
            "/usage/report",
            post(report_usage)
                .layer(axum::middleware::from_fn(rate_limit_middleware))
                .layer(Extension(usage_rate_limit)),
        )
        .route("/status/:listing_id/:buyer_wallet", get(get_payment_status))
        .route("/refund", post(refund_unused))
        .route("/seller/:wallet", get(get_seller_payments))
        .route("/buyer/:wallet", get(get_buyer_payments));

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/payments", payments)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(create_cors_layer()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
