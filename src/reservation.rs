// =============================================================================
// RESERVATION COORDINATOR
// =============================================================================
// Reserves stock for every line of an order, one product at a time.
//
// There is no multi-record transaction underneath: if a later line fails,
// every line reserved so far is restored (a compensating sequence). Restore
// failures are collected and reported rather than dropped, so a caller can
// tell "nothing happened" apart from "stock may be leaked".
// =============================================================================

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::{LineItem, OrderItemRequest};
use crate::store::{ProductStockStore, StoreError};

/// A restore that failed during compensation.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreFailure {
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ReservationError {
    /// The product is missing or has fewer than `requested` units.
    /// Every earlier reservation has been restored.
    #[error("Insufficient stock for product {product_id} (requested {requested})")]
    InsufficientStock { product_id: Uuid, requested: i32 },

    /// The stock store failed mid-sequence. Every earlier reservation has
    /// been restored.
    #[error("Stock store failure: {0}")]
    Storage(#[from] StoreError),

    /// The sequence failed and some restores failed too.
    #[error("{cause}; {} restore(s) failed during compensation", .failures.len())]
    PartiallyCompensated {
        cause: Box<ReservationError>,
        failures: Vec<RestoreFailure>,
    },
}

#[derive(Clone)]
pub struct ReservationCoordinator {
    products: Arc<dyn ProductStockStore>,
}

impl ReservationCoordinator {
    pub fn new(products: Arc<dyn ProductStockStore>) -> Self {
        Self { products }
    }

    /// Reserves every item in input order and returns snapshotted line items.
    ///
    /// On the first failure all successful reservations are restored before
    /// returning, so no partial reservation outlives this call.
    pub async fn reserve_all(
        &self,
        items: &[OrderItemRequest],
    ) -> Result<Vec<LineItem>, ReservationError> {
        let mut reserved: Vec<LineItem> = Vec::with_capacity(items.len());

        for item in items {
            let failure = match self.products.reserve(item.product, item.quantity).await {
                Ok(Some(product)) => {
                    metrics::record_reservation(true);
                    metrics::set_stock_level(product.id, product.stock);
                    reserved.push(LineItem::snapshot(&product, item.quantity));
                    continue;
                }
                Ok(None) => ReservationError::InsufficientStock {
                    product_id: item.product,
                    requested: item.quantity,
                },
                Err(e) => ReservationError::Storage(e),
            };

            metrics::record_reservation(false);
            warn!(
                product_id = %item.product,
                quantity = item.quantity,
                already_reserved = reserved.len(),
                error = %failure,
                "Reservation failed, restoring earlier lines"
            );

            let failures = self.release_all(&reserved).await;
            if failures.is_empty() {
                return Err(failure);
            }
            return Err(ReservationError::PartiallyCompensated {
                cause: Box::new(failure),
                failures,
            });
        }

        Ok(reserved)
    }

    /// Restores the quantity of every line item.
    ///
    /// Every restore is attempted even if earlier ones fail; the failures are
    /// returned (empty when everything was restored).
    pub async fn release_all(&self, items: &[LineItem]) -> Vec<RestoreFailure> {
        let mut failures = Vec::new();

        for item in items {
            match self.products.restore(item.product, item.quantity).await {
                Ok(()) => metrics::record_restore(true),
                Err(e) => {
                    metrics::record_restore(false);
                    error!(
                        product_id = %item.product,
                        quantity = item.quantity,
                        error = %e,
                        "Failed to restore stock"
                    );
                    failures.push(RestoreFailure {
                        product_id: item.product,
                        quantity: item.quantity,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            metrics::record_compensation_failures(failures.len());
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::Product;
    use crate::store::StoreResult;
    use async_trait::async_trait;

    fn line(product: Uuid, quantity: i32) -> OrderItemRequest {
        OrderItemRequest { product, quantity }
    }

    #[tokio::test]
    async fn reserves_all_lines_with_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let mug = store.seed_product("Mug", 5).await;
        let cap = store.seed_product("Cap", 2).await;
        let coordinator = ReservationCoordinator::new(store.clone());

        let items = coordinator
            .reserve_all(&[line(mug, 2), line(cap, 2)])
            .await
            .expect("stock is sufficient");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name.as_deref(), Some("Mug"));
        assert_eq!(items[1].image_url.as_deref(), Some("https://img.test/cap.png"));
        assert_eq!(store.stock_of(mug).await, Some(3));
        assert_eq!(store.stock_of(cap).await, Some(0));
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_stock_untouched() {
        let store = Arc::new(MemoryStore::new());
        let x = store.seed_product("X", 2).await;
        let coordinator = ReservationCoordinator::new(store.clone());

        let err = coordinator.reserve_all(&[line(x, 3)]).await.unwrap_err();

        assert!(matches!(
            err,
            ReservationError::InsufficientStock { product_id, requested: 3 } if product_id == x
        ));
        assert_eq!(store.stock_of(x).await, Some(2));
    }

    #[tokio::test]
    async fn later_failure_restores_earlier_lines() {
        let store = Arc::new(MemoryStore::new());
        let first = store.seed_product("First", 4).await;
        let second = store.seed_product("Second", 1).await;
        let coordinator = ReservationCoordinator::new(store.clone());

        let err = coordinator
            .reserve_all(&[line(first, 3), line(second, 2)])
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::InsufficientStock { product_id, .. } if product_id == second));
        assert_eq!(store.stock_of(first).await, Some(4));
        assert_eq!(store.stock_of(second).await, Some(1));
    }

    #[tokio::test]
    async fn unknown_product_is_reported_as_insufficient() {
        let store = Arc::new(MemoryStore::new());
        let real = store.seed_product("Real", 1).await;
        let ghost = Uuid::new_v4();
        let coordinator = ReservationCoordinator::new(store.clone());

        let err = coordinator
            .reserve_all(&[line(real, 1), line(ghost, 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::InsufficientStock { product_id, .. } if product_id == ghost));
        assert_eq!(store.stock_of(real).await, Some(1));
    }

    /// Delegates to a MemoryStore but deletes a product right after its first
    /// successful reservation, so restoring it fails.
    struct VanishingProduct {
        inner: MemoryStore,
        vanishing: Uuid,
    }

    #[async_trait]
    impl ProductStockStore for VanishingProduct {
        async fn reserve(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<Product>> {
            let reserved = self.inner.reserve(product_id, quantity).await?;
            if product_id == self.vanishing {
                self.inner.remove_product(product_id).await;
            }
            Ok(reserved)
        }

        async fn restore(&self, product_id: Uuid, quantity: i32) -> StoreResult<()> {
            self.inner.restore(product_id, quantity).await
        }

        async fn find_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
            self.inner.find_product(product_id).await
        }
    }

    #[tokio::test]
    async fn failed_restores_are_surfaced() {
        let inner = MemoryStore::new();
        let kept = inner.seed_product("Kept", 5).await;
        let vanishing = inner.seed_product("Gone", 5).await;
        let short = inner.seed_product("Short", 0).await;
        let store = Arc::new(VanishingProduct { inner, vanishing });
        let coordinator = ReservationCoordinator::new(store.clone());

        let err = coordinator
            .reserve_all(&[line(kept, 1), line(vanishing, 2), line(short, 1)])
            .await
            .unwrap_err();

        match err {
            ReservationError::PartiallyCompensated { cause, failures } => {
                assert!(matches!(*cause, ReservationError::InsufficientStock { .. }));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].product_id, vanishing);
                assert_eq!(failures[0].quantity, 2);
            }
            other => panic!("expected PartiallyCompensated, got {other:?}"),
        }
        // The restorable line was still restored.
        assert_eq!(store.inner.stock_of(kept).await, Some(5));
    }
}
