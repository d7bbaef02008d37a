// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the storefront.
//
// NOTES:
// - Prometheus scrapes the /metrics endpoint ("pull" model)
// - The `metrics` macros are no-ops until a recorder is installed, so the
//   core modules can record unconditionally (tests never install one)
// =============================================================================

use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use uuid::Uuid;

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: outcome (created/rejected/failed)
pub const ORDERS_TOTAL: &str = "storefront_orders_total";

/// Labels: status (success/failed)
pub const STOCK_RESERVATIONS_TOTAL: &str = "storefront_stock_reservations_total";

/// Labels: status (success/failed)
pub const STOCK_RESTORES_TOTAL: &str = "storefront_stock_restores_total";

/// Restores that failed while compensating a partial reservation or a
/// cancellation. Anything above zero needs an operator.
pub const COMPENSATION_FAILURES_TOTAL: &str = "storefront_compensation_failures_total";

/// Labels: product
pub const PRODUCT_STOCK_LEVEL: &str = "storefront_product_stock_level";

/// Labels: outcome (created/rejected)
pub const REVIEWS_TOTAL: &str = "storefront_reviews_total";

/// Labels: result (hit/miss/error)
pub const CACHE_LOOKUPS_TOTAL: &str = "storefront_cache_lookups_total";

// =============================================================================
// SETUP
// =============================================================================
/// Installs the global Prometheus recorder and returns the render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(ORDERS_TOTAL, "Order placement attempts by outcome");
    describe_counter!(STOCK_RESERVATIONS_TOTAL, "Per-product stock reservation attempts");
    describe_counter!(STOCK_RESTORES_TOTAL, "Per-product stock restorations");
    describe_counter!(
        COMPENSATION_FAILURES_TOTAL,
        "Stock restorations that failed during compensation"
    );
    describe_gauge!(PRODUCT_STOCK_LEVEL, "Last observed stock level per product");
    describe_counter!(REVIEWS_TOTAL, "Review submissions by outcome");
    describe_counter!(CACHE_LOOKUPS_TOTAL, "Product cache lookups by result");

    Ok(handle)
}

// =============================================================================
// HTTP MIDDLEWARE
// =============================================================================
/// Records a counter and a latency sample for every request.
///
/// The endpoint label uses the matched route template (`/api/orders/:id`)
/// rather than the raw path, so ids don't explode label cardinality.
pub async fn track_http(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    record_http_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_order(outcome: &'static str) {
    counter!(ORDERS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_reservation(success: bool) {
    let status = if success { "success" } else { "failed" };
    counter!(STOCK_RESERVATIONS_TOTAL, "status" => status).increment(1);
}

pub fn record_restore(success: bool) {
    let status = if success { "success" } else { "failed" };
    counter!(STOCK_RESTORES_TOTAL, "status" => status).increment(1);
}

pub fn record_compensation_failures(count: usize) {
    counter!(COMPENSATION_FAILURES_TOTAL).increment(count as u64);
}

pub fn set_stock_level(product_id: Uuid, level: i32) {
    gauge!(PRODUCT_STOCK_LEVEL, "product" => product_id.to_string()).set(level as f64);
}

pub fn record_review(outcome: &'static str) {
    counter!(REVIEWS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!(CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}
