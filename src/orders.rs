// =============================================================================
// ORDER LIFECYCLE
// =============================================================================
// Order placement, cancellation, admin status changes and the read
// projections used by the order endpoints.
//
// PLACEMENT:
//   validate ─► reserve every line ─► persist ─► Order
//                    │                  │
//                    ▼                  ▼
//           InsufficientStock    restore all lines, return the error
//
// From the stock counters' point of view placement is all-or-nothing.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::{CreateOrderRequest, LineItem, Order, OrderStatus, Product};
use crate::reservation::{ReservationCoordinator, ReservationError, RestoreFailure};
use crate::store::{OrderStore, ProductStockStore, StoreError};

/// Payment reference meaning "pay on delivery".
pub const CASH_ON_DELIVERY: &str = "COD";

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("No products specified")]
    EmptyCart,

    #[error("{0}")]
    Validation(String),

    #[error("Insufficient stock for product {product_id} (requested {requested})")]
    InsufficientStock { product_id: Uuid, requested: i32 },

    #[error("Order not found")]
    NotFound,

    #[error("Cannot move order from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Stock restoration failed for some lines; those units may be leaked.
    /// `products` lists every product whose stock the operation moved.
    #[error("{reason}; {} stock restore(s) failed", .failures.len())]
    PartiallyCompensated {
        reason: String,
        products: Vec<Uuid>,
        failures: Vec<RestoreFailure>,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ReservationError> for OrderError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::InsufficientStock {
                product_id,
                requested,
            } => OrderError::InsufficientStock {
                product_id,
                requested,
            },
            ReservationError::Storage(e) => OrderError::Storage(e),
            ReservationError::PartiallyCompensated { cause, failures } => {
                OrderError::PartiallyCompensated {
                    reason: cause.to_string(),
                    products: failures.iter().map(|f| f.product_id).collect(),
                    failures,
                }
            }
        }
    }
}

/// Initial status of a new order: paid when a payment reference came with
/// it, pending otherwise (no reference, or exactly "COD").
pub fn initial_status(payment_id: Option<&str>) -> OrderStatus {
    match payment_id {
        Some(id) if !id.is_empty() && id != CASH_ON_DELIVERY => OrderStatus::Paid,
        _ => OrderStatus::Pending,
    }
}

#[derive(Clone)]
pub struct OrderLifecycleManager {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStockStore>,
    reservations: ReservationCoordinator,
}

impl OrderLifecycleManager {
    pub fn new(orders: Arc<dyn OrderStore>, products: Arc<dyn ProductStockStore>) -> Self {
        let reservations = ReservationCoordinator::new(Arc::clone(&products));
        Self {
            orders,
            products,
            reservations,
        }
    }

    // -------------------------------------------------------------------------
    // CREATE
    // -------------------------------------------------------------------------
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<Order, OrderError> {
        let total = validate_new_order(&request)?;

        let items = match self.reservations.reserve_all(&request.products).await {
            Ok(items) => items,
            Err(e) => {
                metrics::record_order("rejected");
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            items,
            total,
            status: initial_status(request.payment_id.as_deref()),
            payment_id: request.payment_id,
            shipping_address: request.shipping_address,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.orders.insert(&order).await {
            metrics::record_order("failed");
            warn!(order_id = %order.id, error = %e, "Persisting order failed, restoring stock");
            let failures = self.reservations.release_all(&order.items).await;
            if failures.is_empty() {
                return Err(OrderError::Storage(e));
            }
            return Err(OrderError::PartiallyCompensated {
                reason: format!("order persistence failed: {e}"),
                products: order.items.iter().map(|item| item.product).collect(),
                failures,
            });
        }

        metrics::record_order("created");
        info!(
            order_id = %order.id,
            user_id = %user_id,
            lines = order.items.len(),
            status = %order.status,
            "Order placed"
        );
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // CANCEL
    // -------------------------------------------------------------------------
    /// Cancels a pending order owned by `user_id` and returns its stock.
    ///
    /// The status change is a compare-and-set in the store, so when two
    /// cancellations race only one of them restores stock.
    pub async fn cancel(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, OrderError> {
        let order = self
            .orders
            .find_for_user(order_id, user_id)
            .await?
            .ok_or(OrderError::NotFound)?;

        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                current: order.status,
                requested: OrderStatus::Cancelled,
            });
        }

        let cancelled = match self
            .orders
            .transition_status(order_id, user_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await?
        {
            Some(order) => order,
            None => {
                // Someone else moved it first. Ownership was checked above.
                let current = self
                    .orders
                    .find(order_id)
                    .await?
                    .ok_or(OrderError::NotFound)?;
                return Err(OrderError::InvalidTransition {
                    current: current.status,
                    requested: OrderStatus::Cancelled,
                });
            }
        };

        let failures = self.reservations.release_all(&cancelled.items).await;
        if !failures.is_empty() {
            return Err(OrderError::PartiallyCompensated {
                reason: format!("order {order_id} was cancelled"),
                products: cancelled.items.iter().map(|item| item.product).collect(),
                failures,
            });
        }

        info!(order_id = %order_id, user_id = %user_id, "Order cancelled, stock restored");
        Ok(cancelled)
    }

    // -------------------------------------------------------------------------
    // ADMIN STATUS UPDATE
    // -------------------------------------------------------------------------
    /// Sets any valid status on an order that is not cancelled. No stock
    /// moves.
    ///
    /// Cancelled is terminal; its stock has already been returned.
    pub async fn set_status(&self, order_id: Uuid, status: &str) -> Result<Order, OrderError> {
        let status: OrderStatus = status.parse().map_err(OrderError::InvalidStatus)?;

        let Some(order) = self.orders.set_status(order_id, status).await? else {
            return match self.orders.find(order_id).await? {
                Some(existing) => Err(OrderError::InvalidTransition {
                    current: existing.status,
                    requested: status,
                }),
                None => Err(OrderError::NotFound),
            };
        };

        info!(order_id = %order_id, status = %status, "Order status updated");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // READ PROJECTIONS
    // -------------------------------------------------------------------------
    pub async fn list_mine(&self, user_id: Uuid) -> Result<Vec<Order>, OrderError> {
        let orders = self.orders.list_for_user(user_id).await?;
        Ok(self.with_snapshots(orders).await)
    }

    pub async fn get_mine(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, OrderError> {
        let order = self
            .orders
            .find_for_user(order_id, user_id)
            .await?
            .ok_or(OrderError::NotFound)?;
        Ok(self.with_snapshots(vec![order]).await.remove(0))
    }

    pub async fn list_all(&self) -> Result<Vec<Order>, OrderError> {
        let orders = self.orders.list_all().await?;
        Ok(self.with_snapshots(orders).await)
    }

    // -------------------------------------------------------------------------
    // SNAPSHOT BACKFILL
    // -------------------------------------------------------------------------
    /// Writes catalog snapshots into stored orders that predate snapshotting.
    /// Returns how many orders were rewritten.
    pub async fn backfill_snapshots(&self) -> Result<usize, OrderError> {
        let mut catalog = HashMap::new();
        let mut rewritten = 0;

        for mut order in self.orders.list_all().await? {
            if !order.items.iter().any(LineItem::needs_snapshot) {
                continue;
            }
            let before = order.items.clone();
            self.fill_items(&mut order.items, &mut catalog).await;
            if order.items != before {
                self.orders.replace_items(order.id, &order.items).await?;
                rewritten += 1;
            }
        }

        if rewritten > 0 {
            info!(rewritten, "Backfilled order line-item snapshots");
        }
        Ok(rewritten)
    }

    /// Fills missing snapshot fields from the live catalog. Stored snapshots
    /// always win; a product that no longer exists leaves the fields empty.
    async fn with_snapshots(&self, mut orders: Vec<Order>) -> Vec<Order> {
        let mut catalog = HashMap::new();
        for order in &mut orders {
            self.fill_items(&mut order.items, &mut catalog).await;
        }
        orders
    }

    async fn fill_items(
        &self,
        items: &mut [LineItem],
        catalog: &mut HashMap<Uuid, Option<Product>>,
    ) {
        for item in items.iter_mut().filter(|item| item.needs_snapshot()) {
            if !catalog.contains_key(&item.product) {
                let product = match self.products.find_product(item.product).await {
                    Ok(product) => product,
                    Err(e) => {
                        warn!(product_id = %item.product, error = %e, "Catalog lookup failed");
                        None
                    }
                };
                catalog.insert(item.product, product);
            }
            if let Some(Some(product)) = catalog.get(&item.product) {
                item.fill_from_catalog(product);
            }
        }
    }
}

/// Checks the request shape and returns the order total.
fn validate_new_order(request: &CreateOrderRequest) -> Result<f64, OrderError> {
    if request.products.is_empty() {
        return Err(OrderError::EmptyCart);
    }
    if let Some(item) = request.products.iter().find(|item| item.quantity < 1) {
        return Err(OrderError::Validation(format!(
            "Quantity for product {} must be at least 1",
            item.product
        )));
    }
    match request.total {
        None => Err(OrderError::Validation("Order total is required".to_string())),
        Some(total) if !total.is_finite() || total < 0.0 => Err(OrderError::Validation(
            "Order total must be a non-negative number".to_string(),
        )),
        Some(total) => Ok(total),
    }
}
