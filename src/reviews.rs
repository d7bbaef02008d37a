// =============================================================================
// REVIEWS
// =============================================================================
// Who may review what is derived from order history:
// a user may review a product once per *delivered* order that contains it.
//
// - ReviewEligibilityGate: the read-only eligibility rules
// - ReviewService: creating (through the gate), listing, replying,
//   editing and deleting reviews
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::metrics;
use crate::models::{
    Caller, CanReviewResponse, CreateReviewRequest, Order, OrderStatus, Reply, Review,
    UpdateReviewRequest,
};
use crate::store::{OrderStore, ReviewStore, StoreError};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{0}")]
    Validation(String),

    #[error("Order not found")]
    OrderNotFound,

    #[error("You can only review products from delivered orders")]
    NotDelivered,

    #[error("Product not found in this order")]
    ProductNotInOrder,

    #[error("You have already reviewed this product for this order")]
    AlreadyReviewed,

    #[error("Review not found or you do not have permission to change it")]
    ReviewNotFound,

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for ReviewError {
    fn from(err: StoreError) -> Self {
        match err {
            // A concurrent duplicate insert lost the race on the unique index.
            StoreError::Conflict(_) => ReviewError::AlreadyReviewed,
            other => ReviewError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { order_id: Uuid },
    Ineligible { reason: String },
}

impl From<Eligibility> for CanReviewResponse {
    fn from(eligibility: Eligibility) -> Self {
        match eligibility {
            Eligibility::Eligible { order_id } => CanReviewResponse {
                can_review: true,
                order_id: Some(order_id),
                message: None,
            },
            Eligibility::Ineligible { reason } => CanReviewResponse {
                can_review: false,
                order_id: None,
                message: Some(reason),
            },
        }
    }
}

fn contains_product(order: &Order, product_id: Uuid) -> bool {
    order.items.iter().any(|item| item.product == product_id)
}

fn validate_rating(rating: i32) -> Result<(), ReviewError> {
    if !(1..=5).contains(&rating) {
        return Err(ReviewError::Validation(
            "Rating must be between 1 and 5".to_string(),
        ));
    }
    Ok(())
}

/// Trims a comment and rejects it when nothing is left.
fn clean_comment(comment: &str, field: &str) -> Result<String, ReviewError> {
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Err(ReviewError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

// =============================================================================
// ELIGIBILITY GATE
// =============================================================================
#[derive(Clone)]
pub struct ReviewEligibilityGate {
    orders: Arc<dyn OrderStore>,
    reviews: Arc<dyn ReviewStore>,
}

impl ReviewEligibilityGate {
    pub fn new(orders: Arc<dyn OrderStore>, reviews: Arc<dyn ReviewStore>) -> Self {
        Self { orders, reviews }
    }

    /// Eligible iff some delivered order of the user contains the product and
    /// has no review from this user for it yet. The first such order in
    /// store order (newest first) is returned.
    pub async fn can_review(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Eligibility, ReviewError> {
        let candidates: Vec<Order> = self
            .orders
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Delivered && contains_product(o, product_id))
            .collect();

        if candidates.is_empty() {
            return Ok(Eligibility::Ineligible {
                reason: "No delivered order contains this product".to_string(),
            });
        }

        for order in candidates {
            if !self.reviews.exists_for(user_id, product_id, order.id).await? {
                return Ok(Eligibility::Eligible { order_id: order.id });
            }
        }

        Ok(Eligibility::Ineligible {
            reason: "You have already reviewed this product".to_string(),
        })
    }

    /// Checks that `user_id` may review `product_id` for `order_id`, in the
    /// order: ownership, delivery, product membership, uniqueness.
    pub async fn check(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ReviewError> {
        let order = self
            .orders
            .find_for_user(order_id, user_id)
            .await?
            .ok_or(ReviewError::OrderNotFound)?;

        if order.status != OrderStatus::Delivered {
            return Err(ReviewError::NotDelivered);
        }
        if !contains_product(&order, product_id) {
            return Err(ReviewError::ProductNotInOrder);
        }
        if self.reviews.exists_for(user_id, product_id, order_id).await? {
            return Err(ReviewError::AlreadyReviewed);
        }
        Ok(())
    }
}

// =============================================================================
// REVIEW SERVICE
// =============================================================================
#[derive(Clone)]
pub struct ReviewService {
    gate: ReviewEligibilityGate,
    reviews: Arc<dyn ReviewStore>,
}

impl ReviewService {
    pub fn new(orders: Arc<dyn OrderStore>, reviews: Arc<dyn ReviewStore>) -> Self {
        Self {
            gate: ReviewEligibilityGate::new(orders, Arc::clone(&reviews)),
            reviews,
        }
    }

    pub async fn can_review(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Eligibility, ReviewError> {
        self.gate.can_review(user_id, product_id).await
    }

    pub async fn create_review(
        &self,
        user_id: Uuid,
        request: CreateReviewRequest,
    ) -> Result<Review, ReviewError> {
        let (Some(product_id), Some(order_id), Some(rating), Some(comment)) = (
            request.product_id,
            request.order_id,
            request.rating,
            request.comment,
        ) else {
            return Err(ReviewError::Validation(
                "Product ID, Order ID, rating, and comment are required".to_string(),
            ));
        };
        validate_rating(rating)?;
        let comment = clean_comment(&comment, "Comment")?;

        if let Err(e) = self.gate.check(user_id, product_id, order_id).await {
            metrics::record_review("rejected");
            return Err(e);
        }

        let now = Utc::now();
        let review = Review {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            order_id,
            rating,
            comment,
            replies: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.reviews.insert(&review).await?;

        metrics::record_review("created");
        info!(review_id = %review.id, product_id = %product_id, order_id = %order_id, "Review created");
        Ok(review)
    }

    pub async fn list_for_product(&self, product_id: Uuid) -> Result<Vec<Review>, ReviewError> {
        Ok(self.reviews.list_for_product(product_id).await?)
    }

    /// Anyone signed in may reply; admin replies are flagged.
    pub async fn add_reply(
        &self,
        review_id: Uuid,
        caller: Caller,
        comment: Option<String>,
    ) -> Result<Review, ReviewError> {
        let comment = comment
            .ok_or_else(|| ReviewError::Validation("Comment is required".to_string()))?;
        let reply = Reply {
            user_id: caller.user_id,
            comment: clean_comment(&comment, "Comment")?,
            is_admin: caller.is_admin(),
            created_at: Utc::now(),
        };

        self.reviews
            .append_reply(review_id, &reply)
            .await?
            .ok_or(ReviewError::ReviewNotFound)
    }

    /// Only the author may edit a review.
    pub async fn update_review(
        &self,
        review_id: Uuid,
        user_id: Uuid,
        request: UpdateReviewRequest,
    ) -> Result<Review, ReviewError> {
        if let Some(rating) = request.rating {
            validate_rating(rating)?;
        }
        let comment = request
            .comment
            .as_deref()
            .map(|c| clean_comment(c, "Comment"))
            .transpose()?;

        self.reviews
            .update_content(review_id, user_id, request.rating, comment)
            .await?
            .ok_or(ReviewError::ReviewNotFound)
    }

    /// Authors may delete their own reviews; admins may delete any.
    pub async fn delete_review(&self, review_id: Uuid, caller: Caller) -> Result<(), ReviewError> {
        let owner = (!caller.is_admin()).then_some(caller.user_id);
        if !self.reviews.delete(review_id, owner).await? {
            return Err(ReviewError::ReviewNotFound);
        }
        info!(review_id = %review_id, by_admin = caller.is_admin(), "Review deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{CreateOrderRequest, OrderItemRequest, Role};
    use crate::orders::OrderLifecycleManager;

    struct Fixture {
        store: Arc<MemoryStore>,
        orders: OrderLifecycleManager,
        reviews: ReviewService,
        user: Uuid,
        product: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let product = store.seed_product("Teapot", 10).await;
        Fixture {
            orders: OrderLifecycleManager::new(store.clone(), store.clone()),
            reviews: ReviewService::new(store.clone(), store.clone()),
            store,
            user: Uuid::new_v4(),
            product,
        }
    }

    impl Fixture {
        async fn place_order(&self) -> Order {
            self.orders
                .create_order(
                    self.user,
                    CreateOrderRequest {
                        products: vec![OrderItemRequest {
                            product: self.product,
                            quantity: 1,
                        }],
                        total: Some(10.0),
                        payment_id: Some("sess_1".into()),
                        shipping_address: None,
                    },
                )
                .await
                .expect("order placed")
        }

        fn review_request(&self, order_id: Uuid) -> CreateReviewRequest {
            CreateReviewRequest {
                product_id: Some(self.product),
                order_id: Some(order_id),
                rating: Some(5),
                comment: Some("  Pours well  ".into()),
            }
        }

        fn caller(&self, role: Role) -> Caller {
            Caller {
                user_id: self.user,
                role,
            }
        }
    }

    #[tokio::test]
    async fn review_requires_delivered_order_and_is_unique() {
        let f = fixture().await;
        let order = f.place_order().await;
        f.orders.set_status(order.id, "shipped").await.unwrap();

        let err = f
            .reviews
            .create_review(f.user, f.review_request(order.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotDelivered));
        assert!(matches!(
            f.reviews.can_review(f.user, f.product).await.unwrap(),
            Eligibility::Ineligible { .. }
        ));

        f.orders.set_status(order.id, "delivered").await.unwrap();
        assert_eq!(
            f.reviews.can_review(f.user, f.product).await.unwrap(),
            Eligibility::Eligible { order_id: order.id }
        );

        let review = f
            .reviews
            .create_review(f.user, f.review_request(order.id))
            .await
            .unwrap();
        assert_eq!(review.comment, "Pours well");

        let err = f
            .reviews
            .create_review(f.user, f.review_request(order.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyReviewed));
        assert!(matches!(
            f.reviews.can_review(f.user, f.product).await.unwrap(),
            Eligibility::Ineligible { .. }
        ));
    }

    #[tokio::test]
    async fn second_delivered_order_stays_reviewable() {
        let f = fixture().await;
        let older = f.place_order().await;
        let newer = f.place_order().await;
        f.orders.set_status(older.id, "delivered").await.unwrap();
        f.orders.set_status(newer.id, "delivered").await.unwrap();

        f.reviews
            .create_review(f.user, f.review_request(newer.id))
            .await
            .unwrap();

        assert_eq!(
            f.reviews.can_review(f.user, f.product).await.unwrap(),
            Eligibility::Eligible { order_id: older.id }
        );
    }

    #[tokio::test]
    async fn gate_rejects_foreign_orders_and_missing_products() {
        let f = fixture().await;
        let order = f.place_order().await;
        f.orders.set_status(order.id, "delivered").await.unwrap();

        let err = f
            .reviews
            .create_review(Uuid::new_v4(), f.review_request(order.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::OrderNotFound));

        let mut other_product = f.review_request(order.id);
        other_product.product_id = Some(Uuid::new_v4());
        let err = f.reviews.create_review(f.user, other_product).await.unwrap_err();
        assert!(matches!(err, ReviewError::ProductNotInOrder));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_lookups() {
        let f = fixture().await;
        let order = f.place_order().await;

        let mut bad_rating = f.review_request(order.id);
        bad_rating.rating = Some(6);
        assert!(matches!(
            f.reviews.create_review(f.user, bad_rating).await,
            Err(ReviewError::Validation(_))
        ));

        let mut blank = f.review_request(order.id);
        blank.comment = Some("   ".into());
        assert!(matches!(
            f.reviews.create_review(f.user, blank).await,
            Err(ReviewError::Validation(_))
        ));

        let mut missing = f.review_request(order.id);
        missing.order_id = None;
        assert!(matches!(
            f.reviews.create_review(f.user, missing).await,
            Err(ReviewError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn replies_edits_and_deletes() {
        let f = fixture().await;
        let order = f.place_order().await;
        f.orders.set_status(order.id, "delivered").await.unwrap();
        let review = f
            .reviews
            .create_review(f.user, f.review_request(order.id))
            .await
            .unwrap();

        let admin = Caller {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let replied = f
            .reviews
            .add_reply(review.id, admin, Some("Thanks!".into()))
            .await
            .unwrap();
        assert_eq!(replied.replies.len(), 1);
        assert!(replied.replies[0].is_admin);

        let stranger = Uuid::new_v4();
        let err = f
            .reviews
            .update_review(review.id, stranger, UpdateReviewRequest { rating: Some(1), comment: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::ReviewNotFound));

        let edited = f
            .reviews
            .update_review(review.id, f.user, UpdateReviewRequest { rating: Some(4), comment: None })
            .await
            .unwrap();
        assert_eq!(edited.rating, 4);
        assert_eq!(edited.comment, "Pours well");

        let other_user = Caller {
            user_id: stranger,
            role: Role::User,
        };
        assert!(matches!(
            f.reviews.delete_review(review.id, other_user).await,
            Err(ReviewError::ReviewNotFound)
        ));
        f.reviews.delete_review(review.id, f.caller(Role::User)).await.unwrap();
        assert!(f.reviews.list_for_product(f.product).await.unwrap().is_empty());

        // Deleting the review makes the order reviewable again.
        assert!(matches!(
            f.reviews.can_review(f.user, f.product).await.unwrap(),
            Eligibility::Eligible { .. }
        ));
        assert_eq!(f.store.stock_of(f.product).await, Some(9));
    }
}
