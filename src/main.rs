// =============================================================================
// STOREFRONT SERVICE - Main Entry Point
// =============================================================================
// WHAT THIS SERVICE DOES:
// - Serves the product catalog (with a Redis read-through cache)
// - Places orders, reserving stock for every line and rolling the
//   reservation back if any line or the final write fails
// - Cancels pending orders and returns their stock
// - Gates reviews on delivered orders
// - Exposes Prometheus metrics and health probes
// =============================================================================

// -----------------------------------------------------------------------------
// MODULE DECLARATIONS
// -----------------------------------------------------------------------------
mod auth; // Bearer-token extractors (auth.rs)
mod cache; // Redis product cache (cache.rs)
mod config; // Configuration loading (config.rs)
mod db; // PostgreSQL storage (db.rs)
mod error; // HTTP error mapping (error.rs)
mod handlers; // HTTP request handlers (handlers.rs)
#[cfg(test)]
mod memory; // In-memory storage for tests (memory.rs)
mod metrics; // Prometheus metrics setup (metrics.rs)
mod models; // Data structures (models.rs)
mod orders; // Order lifecycle (orders.rs)
mod reservation; // Multi-line stock reservation (reservation.rs)
mod reviews; // Review eligibility and maintenance (reviews.rs)
mod store; // Storage traits (store.rs)

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::JwtVerifier;
use crate::cache::ProductCache;
use crate::config::Config;
use crate::db::Database;
use crate::metrics::setup_metrics;
use crate::orders::OrderLifecycleManager;
use crate::reviews::ReviewService;

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Shared by every handler through State<Arc<AppState>>.
//
// The order and review components get their storage handles injected here;
// they never reach for a global connection.
pub struct AppState {
    /// PostgreSQL pool (catalog queries + readiness)
    pub db: Database,

    /// Redis product cache
    pub cache: ProductCache,

    pub orders: OrderLifecycleManager,

    pub reviews: ReviewService,

    pub jwt: JwtVerifier,

    /// Prometheus metrics handle
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok(); // .env is optional

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // JSON logs; RUST_LOG controls levels.
    // Example: RUST_LOG=info,storefront_service=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Storefront Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(port = config.port, "Configuration loaded");

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Connect to PostgreSQL and migrate
    // -------------------------------------------------------------------------
    let db = Database::connect(&config.database_url, config.db_max_connections).await?;
    info!("Connected to PostgreSQL");

    db.run_migrations(config.seed_sample_data).await?;
    info!("Database migrations completed");

    // -------------------------------------------------------------------------
    // STEP 6: Connect to Redis
    // -------------------------------------------------------------------------
    let cache = ProductCache::connect(&config.redis_url, config.product_cache_ttl_secs).await?;
    info!("Connected to Redis");

    // -------------------------------------------------------------------------
    // STEP 7: Wire the core components
    // -------------------------------------------------------------------------
    let storage = Arc::new(db.clone());
    let orders = OrderLifecycleManager::new(storage.clone(), storage.clone());
    let reviews = ReviewService::new(storage.clone(), storage);

    // Orders written before line items carried snapshots get them now.
    let backfilled = orders.backfill_snapshots().await?;
    info!(backfilled, "Order snapshot backfill completed");

    let state = Arc::new(AppState {
        db,
        cache,
        orders,
        reviews,
        jwt: JwtVerifier::new(&config.jwt_secret),
        metrics_handle,
    });

    // -------------------------------------------------------------------------
    // STEP 8: Build the router and serve
    // -------------------------------------------------------------------------
    let app = build_router(state, &config)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Storefront Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes, metrics middleware, CORS and request tracing.
fn build_router(state: Arc<AppState>, config: &Config) -> anyhow::Result<Router> {
    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let api = Router::new()
        // ----- Products -----
        .route(
            "/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/products/:id",
            get(handlers::get_product)
                .put(handlers::update_product)
                .delete(handlers::delete_product),
        )
        // ----- Orders -----
        .route(
            "/orders",
            get(handlers::list_all_orders).post(handlers::create_order),
        )
        .route("/orders/mine", get(handlers::list_my_orders))
        .route("/orders/can-review/:product_id", get(handlers::can_review))
        .route("/orders/:id", get(handlers::get_my_order))
        .route("/orders/:id/cancel", post(handlers::cancel_order))
        .route("/orders/:id/status", put(handlers::update_order_status))
        // ----- Reviews -----
        .route("/reviews", post(handlers::create_review))
        .route(
            "/reviews/product/:product_id",
            get(handlers::list_product_reviews),
        )
        .route("/reviews/:id/reply", post(handlers::add_reply))
        .route(
            "/reviews/:id",
            put(handlers::update_review).delete(handlers::delete_review),
        );

    Ok(Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api", api)
        .route_layer(middleware::from_fn(metrics::track_http))
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
