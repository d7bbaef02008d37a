// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer). Handlers stay thin: extract,
// call the catalog / order / review code, map the result.
//
// AXUM EXTRACTORS USED HERE:
// - State<Arc<AppState>>: shared application state
// - Caller / AdminCaller: authenticated user (see auth.rs)
// - Path<T>: path parameters (/orders/:id → id)
// - Json<T>: JSON request body
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AdminCaller;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::orders::OrderError;
use crate::AppState;

// =============================================================================
// HEALTH & METRICS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "storefront-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: checks PostgreSQL and Redis.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let db_healthy = state.db.health_check().await;
    let redis_healthy = state.cache.ping().await;

    let all_healthy = db_healthy && redis_healthy;
    let response = ReadinessResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: ReadinessChecks {
            database: db_healthy,
            redis: redis_healthy,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Prometheus metrics endpoint
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

/// Fallback for unknown routes
pub async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}

// =============================================================================
// PRODUCTS
// =============================================================================

/// GET /api/products
pub async fn list_products(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Product>>> {
    Ok(Json(state.db.list_products().await?))
}

/// GET /api/products/:id
///
/// Served from the Redis cache when possible.
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    if let Some(product) = state.cache.get(product_id).await {
        return Ok(Json(product));
    }

    let product = state
        .db
        .get_product(product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    state.cache.put(&product).await;
    Ok(Json(product))
}

/// POST /api/products (admin)
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    AdminCaller(admin): AdminCaller,
    Json(request): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    request.validate().map_err(AppError::BadRequest)?;

    let product = state.db.create_product(&request).await?;
    tracing::info!(product_id = %product.id, admin_id = %admin.user_id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /api/products/:id (admin)
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    AdminCaller(admin): AdminCaller,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> AppResult<Json<Product>> {
    request.validate().map_err(AppError::BadRequest)?;

    let product = state
        .db
        .update_product(product_id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    state.cache.invalidate([product_id]).await;
    tracing::info!(product_id = %product_id, admin_id = %admin.user_id, "Product updated");
    Ok(Json(product))
}

/// DELETE /api/products/:id (admin)
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    AdminCaller(admin): AdminCaller,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    if !state.db.delete_product(product_id).await? {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    state.cache.invalidate([product_id]).await;
    tracing::info!(product_id = %product_id, admin_id = %admin.user_id, "Product deleted");
    Ok(Json(MessageResponse::new("Product deleted")))
}

// =============================================================================
// ORDERS
// =============================================================================

/// Runs a stock-moving operation on its own task.
///
/// If the client disconnects, axum drops the handler future; the spawned
/// task keeps going, so a reserve/restore sequence is never cut in half.
async fn run_to_completion<F, T>(operation: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AppError::Internal(format!("order task failed: {e}")))?
}

/// POST /api/orders
///
/// # Request Body
/// ```json
/// {
///   "products": [{ "product": "<uuid>", "quantity": 2 }],
///   "total": 68.0,
///   "paymentId": "COD"
/// }
/// ```
///
/// # Response
/// - 201 Created: the order
/// - 400 Bad Request: empty cart, invalid input, insufficient stock
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let product_ids: Vec<Uuid> = request.products.iter().map(|item| item.product).collect();

    let orders = state.orders.clone();
    let result = run_to_completion(async move {
        orders
            .create_order(caller.user_id, request)
            .await
            .map_err(AppError::from)
    })
    .await;

    // Stock may have moved even on failure (partial compensation).
    state.cache.invalidate(product_ids).await;

    Ok((StatusCode::CREATED, Json(result?)))
}

/// GET /api/orders/mine
pub async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_mine(caller.user_id).await?))
}

/// GET /api/orders/:id
pub async fn get_my_order(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.get_mine(order_id, caller.user_id).await?))
}

/// POST /api/orders/:id/cancel
///
/// Only pending orders can be cancelled; their stock is returned.
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<CancelOrderResponse>> {
    let orders = state.orders.clone();
    let result = run_to_completion(async move {
        orders
            .cancel(order_id, caller.user_id)
            .await
            .map_err(AppError::from)
    })
    .await;

    // A partially compensated cancel still moved stock for some lines.
    let touched: Vec<Uuid> = match &result {
        Ok(order) => order.items.iter().map(|item| item.product).collect(),
        Err(AppError::Order(OrderError::PartiallyCompensated { products, .. })) => {
            products.clone()
        }
        Err(_) => Vec::new(),
    };
    state.cache.invalidate(touched).await;

    let order = result?;

    Ok(Json(CancelOrderResponse {
        message: "Order cancelled".to_string(),
        order,
    }))
}

/// PUT /api/orders/:id/status (admin)
///
/// # Request Body
/// ```json
/// { "status": "shipped" }
/// ```
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    AdminCaller(admin): AdminCaller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> AppResult<Json<Order>> {
    let order = state.orders.set_status(order_id, &request.status).await?;
    tracing::info!(order_id = %order_id, admin_id = %admin.user_id, status = %order.status, "Admin changed order status");
    Ok(Json(order))
}

/// GET /api/orders/can-review/:product_id
pub async fn can_review(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<CanReviewResponse>> {
    let eligibility = state.reviews.can_review(caller.user_id, product_id).await?;
    Ok(Json(eligibility.into()))
}

/// GET /api/orders (admin)
pub async fn list_all_orders(
    State(state): State<Arc<AppState>>,
    AdminCaller(_admin): AdminCaller,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_all().await?))
}

// =============================================================================
// REVIEWS
// =============================================================================

/// POST /api/reviews
///
/// # Request Body
/// ```json
/// { "productId": "<uuid>", "orderId": "<uuid>", "rating": 5, "comment": "Great" }
/// ```
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let review = state.reviews.create_review(caller.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// GET /api/reviews/product/:product_id
pub async fn list_product_reviews(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Vec<Review>>> {
    Ok(Json(state.reviews.list_for_product(product_id).await?))
}

/// POST /api/reviews/:id/reply
pub async fn add_reply(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(review_id): Path<Uuid>,
    Json(request): Json<ReplyRequest>,
) -> AppResult<Json<Review>> {
    Ok(Json(
        state.reviews.add_reply(review_id, caller, request.comment).await?,
    ))
}

/// PUT /api/reviews/:id
pub async fn update_review(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(review_id): Path<Uuid>,
    Json(request): Json<UpdateReviewRequest>,
) -> AppResult<Json<Review>> {
    Ok(Json(
        state
            .reviews
            .update_review(review_id, caller.user_id, request)
            .await?,
    ))
}

/// DELETE /api/reviews/:id
pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(review_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    state.reviews.delete_review(review_id, caller).await?;
    Ok(Json(MessageResponse::new("Review deleted successfully")))
}
