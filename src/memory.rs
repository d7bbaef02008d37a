// =============================================================================
// IN-MEMORY STORE
// =============================================================================
// A single struct implementing every storage trait on top of Tokio locks.
// Used by the unit tests of the reservation, order and review modules.
//
// Atomicity: every trait method takes the relevant lock once, so a
// check-and-decrement in `reserve` can't interleave with another reservation.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{LineItem, Order, OrderStatus, Product, Reply, Review};
use crate::store::{OrderStore, ProductStockStore, ReviewStore, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<Uuid, Product>>,
    /// Insertion order; listings walk it backwards (newest first)
    orders: RwLock<Vec<Order>>,
    reviews: RwLock<Vec<Review>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a catalog entry and returns its id.
    pub async fn seed_product(&self, name: &str, stock: i32) -> Uuid {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            price: 10.0,
            discount: 0.0,
            image_url: format!("https://img.test/{}.png", name.to_lowercase()),
            stock,
            created_at: now,
            updated_at: now,
        };
        let id = product.id;
        self.products.write().await.insert(id, product);
        id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> Option<i32> {
        self.products.read().await.get(&product_id).map(|p| p.stock)
    }

    pub async fn rename_product(&self, product_id: Uuid, name: &str) {
        if let Some(product) = self.products.write().await.get_mut(&product_id) {
            product.name = name.to_string();
        }
    }

    pub async fn remove_product(&self, product_id: Uuid) {
        self.products.write().await.remove(&product_id);
    }
}

#[async_trait]
impl ProductStockStore for MemoryStore {
    async fn reserve(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<Product>> {
        let mut products = self.products.write().await;
        match products.get_mut(&product_id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                product.updated_at = Utc::now();
                Ok(Some(product.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn restore(&self, product_id: Uuid, quantity: i32) -> StoreResult<()> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;
        product.stock += quantity;
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn find_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::Conflict(format!("order {}", order.id)));
        }
        orders.push(order.clone());
        Ok(())
    }

    async fn find(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn find_for_user(&self, order_id: Uuid, user_id: Uuid) -> StoreResult<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .find(|o| o.id == order_id && o.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .rev()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.orders.read().await.iter().rev().cloned().collect())
    }

    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> StoreResult<Option<Order>> {
        let mut orders = self.orders.write().await;
        Ok(orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status != OrderStatus::Cancelled)
            .map(|order| {
                order.status = status;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn transition_status(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        let mut orders = self.orders.write().await;
        Ok(orders
            .iter_mut()
            .find(|o| o.id == order_id && o.user_id == user_id && o.status == from)
            .map(|order| {
                order.status = to;
                order.updated_at = Utc::now();
                order.clone()
            }))
    }

    async fn replace_items(&self, order_id: Uuid, items: &[LineItem]) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        order.items = items.to_vec();
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn insert(&self, review: &Review) -> StoreResult<()> {
        let mut reviews = self.reviews.write().await;
        let duplicate = reviews.iter().any(|r| {
            r.user_id == review.user_id
                && r.product_id == review.product_id
                && r.order_id == review.order_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "review for product {} in order {}",
                review.product_id, review.order_id
            )));
        }
        reviews.push(review.clone());
        Ok(())
    }

    async fn exists_for(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        order_id: Uuid,
    ) -> StoreResult<bool> {
        let reviews = self.reviews.read().await;
        Ok(reviews.iter().any(|r| {
            r.user_id == user_id && r.product_id == product_id && r.order_id == order_id
        }))
    }

    async fn list_for_product(&self, product_id: Uuid) -> StoreResult<Vec<Review>> {
        let reviews = self.reviews.read().await;
        Ok(reviews
            .iter()
            .rev()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn append_reply(&self, review_id: Uuid, reply: &Reply) -> StoreResult<Option<Review>> {
        let mut reviews = self.reviews.write().await;
        Ok(reviews.iter_mut().find(|r| r.id == review_id).map(|review| {
            review.replies.push(reply.clone());
            review.updated_at = Utc::now();
            review.clone()
        }))
    }

    async fn update_content(
        &self,
        review_id: Uuid,
        user_id: Uuid,
        rating: Option<i32>,
        comment: Option<String>,
    ) -> StoreResult<Option<Review>> {
        let mut reviews = self.reviews.write().await;
        Ok(reviews
            .iter_mut()
            .find(|r| r.id == review_id && r.user_id == user_id)
            .map(|review| {
                if let Some(rating) = rating {
                    review.rating = rating;
                }
                if let Some(comment) = comment {
                    review.comment = comment;
                }
                review.updated_at = Utc::now();
                review.clone()
            }))
    }

    async fn delete(&self, review_id: Uuid, owner: Option<Uuid>) -> StoreResult<bool> {
        let mut reviews = self.reviews.write().await;
        let before = reviews.len();
        reviews.retain(|r| !(r.id == review_id && owner.map_or(true, |uid| r.user_id == uid)));
        Ok(reviews.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn reserve_then_restore_round_trips() {
        let store = MemoryStore::new();
        let id = store.seed_product("Lamp", 5).await;

        let reserved = store.reserve(id, 3).await.unwrap().expect("enough stock");
        assert_eq!(reserved.stock, 2);

        store.restore(id, 3).await.unwrap();
        assert_eq!(store.stock_of(id).await, Some(5));
    }

    #[tokio::test]
    async fn reserve_refuses_missing_product_and_short_stock() {
        let store = MemoryStore::new();
        let id = store.seed_product("Lamp", 2).await;

        assert!(store.reserve(id, 3).await.unwrap().is_none());
        assert!(store.reserve(Uuid::new_v4(), 1).await.unwrap().is_none());
        assert_eq!(store.stock_of(id).await, Some(2));
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let id = store.seed_product("Kettle", 7).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.reserve(id, 2).await }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                successes += 1;
            }
        }

        assert_eq!(successes, 3);
        assert_eq!(store.stock_of(id).await, Some(1));
    }
}
