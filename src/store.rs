// =============================================================================
// STORAGE TRAITS
// =============================================================================
// The core (reservation, order lifecycle, reviews) talks to storage only
// through these traits. Each component receives its handles as
// `Arc<dyn Trait>` in its constructor:
// - `db::Database` implements them on PostgreSQL
// - `memory::MemoryStore` implements them in memory for tests
//
// NOTE:
// `#[async_trait]` is needed because the traits are used as trait objects;
// native `async fn` in traits is not object safe.
// =============================================================================

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{LineItem, Order, OrderStatus, Product, Reply, Review};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint rejected the write
    #[error("Duplicate record: {0}")]
    Conflict(String),

    #[error("Stored record is malformed: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// -----------------------------------------------------------------------------
// PRODUCT STOCK
// -----------------------------------------------------------------------------
#[async_trait]
pub trait ProductStockStore: Send + Sync {
    /// Atomically decrements stock by `quantity` if at least `quantity` units
    /// are on hand. Returns the updated product, or `None` when the product
    /// does not exist or has too little stock.
    ///
    /// Concurrent calls against one product are linearizable: stock can
    /// never be driven below zero.
    async fn reserve(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<Product>>;

    /// Atomically increments stock by `quantity`.
    ///
    /// Each call must pair with exactly one earlier successful `reserve` of
    /// the same quantity; the store does not deduplicate.
    async fn restore(&self, product_id: Uuid, quantity: i32) -> StoreResult<()>;

    /// Catalog lookup used to fill missing order snapshots.
    async fn find_product(&self, product_id: Uuid) -> StoreResult<Option<Product>>;
}

// -----------------------------------------------------------------------------
// ORDERS
// -----------------------------------------------------------------------------
/// Order persistence. Listing methods return newest orders first.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    async fn find(&self, order_id: Uuid) -> StoreResult<Option<Order>>;

    /// Finds an order only if it belongs to `user_id`.
    async fn find_for_user(&self, order_id: Uuid, user_id: Uuid) -> StoreResult<Option<Order>>;

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;

    async fn list_all(&self) -> StoreResult<Vec<Order>>;

    /// Sets the status of any order that is not cancelled. `None` if the
    /// order does not exist or is cancelled.
    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> StoreResult<Option<Order>>;

    /// Compare-and-set on the status of a user's order: moves it from `from`
    /// to `to` only if it is currently `from`. `None` when the order is
    /// missing, not owned by `user_id`, or no longer in `from`.
    async fn transition_status(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>>;

    /// Rewrites the stored line items (snapshot backfill).
    async fn replace_items(&self, order_id: Uuid, items: &[LineItem]) -> StoreResult<()>;
}

// -----------------------------------------------------------------------------
// REVIEWS
// -----------------------------------------------------------------------------
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Fails with `StoreError::Conflict` if a review for the same
    /// (user, product, order) already exists.
    async fn insert(&self, review: &Review) -> StoreResult<()>;

    async fn exists_for(&self, user_id: Uuid, product_id: Uuid, order_id: Uuid)
        -> StoreResult<bool>;

    /// Newest first
    async fn list_for_product(&self, product_id: Uuid) -> StoreResult<Vec<Review>>;

    /// Appends a reply atomically. `None` if the review does not exist.
    async fn append_reply(&self, review_id: Uuid, reply: &Reply) -> StoreResult<Option<Review>>;

    /// Updates rating and/or comment of a review owned by `user_id`.
    /// `None` if no such review is owned by that user.
    async fn update_content(
        &self,
        review_id: Uuid,
        user_id: Uuid,
        rating: Option<i32>,
        comment: Option<String>,
    ) -> StoreResult<Option<Review>>;

    /// Deletes a review. With `owner` set, only a review owned by that user
    /// matches. Returns whether a review was deleted.
    async fn delete(&self, review_id: Uuid, owner: Option<Uuid>) -> StoreResult<bool>;
}
