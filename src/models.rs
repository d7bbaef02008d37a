// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures shared by the storage layer, the order/review core and the
// HTTP handlers.
//
// NOTES:
// - Everything that crosses the API boundary is camelCase JSON
// - Order line items, shipping addresses and review replies are stored as
//   JSONB documents, so they derive both Serialize and Deserialize
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// CALLER IDENTITY
// =============================================================================
// Resolved by the auth extractor before any core operation runs.

/// Role carried in the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// =============================================================================
// PRODUCT
// =============================================================================
// A catalog entry. `stock` is only ever changed through the reservation and
// restoration operations of the stock store (or an explicit admin update).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,

    pub name: String,

    pub description: Option<String>,

    /// Unit price, never negative
    pub price: f64,

    /// Percentage discount in 0..=100
    pub discount: f64,

    pub image_url: String,

    /// Units on hand. A CHECK constraint keeps this at or above zero.
    pub stock: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a product (admin only)
///
/// # Example JSON
/// ```json
/// {
///   "name": "Trail Shoe",
///   "price": 89.5,
///   "imageUrl": "https://cdn.example.com/shoe.png",
///   "stock": 12
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub discount: f64,
    pub image_url: String,
    #[serde(default)]
    pub stock: i32,
}

impl CreateProductRequest {
    /// Returns a human-readable message for the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Product name is required".to_string());
        }
        if self.image_url.trim().is_empty() {
            return Err("Product imageUrl is required".to_string());
        }
        validate_price(self.price)?;
        validate_discount(self.discount)?;
        validate_stock(self.stock)
    }
}

/// Request body for a partial product update (admin only).
/// Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<f64>,
    pub image_url: Option<String>,
    pub stock: Option<i32>,
}

impl UpdateProductRequest {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err("Product name cannot be empty".to_string());
        }
        if matches!(&self.image_url, Some(url) if url.trim().is_empty()) {
            return Err("Product imageUrl cannot be empty".to_string());
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(discount) = self.discount {
            validate_discount(discount)?;
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
        }
        Ok(())
    }
}

fn validate_price(price: f64) -> Result<(), String> {
    if !price.is_finite() || price < 0.0 {
        return Err("Price must be non-negative".to_string());
    }
    Ok(())
}

fn validate_discount(discount: f64) -> Result<(), String> {
    if !(0.0..=100.0).contains(&discount) {
        return Err("Discount must be between 0 and 100".to_string());
    }
    Ok(())
}

fn validate_stock(stock: i32) -> Result<(), String> {
    if stock < 0 {
        return Err("Stock must be non-negative".to_string());
    }
    Ok(())
}

// =============================================================================
// ORDER STATUS
// =============================================================================
// pending ──► paid ──► shipped ──► delivered
//    │
//    └──► cancelled   (the only transition a customer can trigger)
//
// Admins may set any status from any status; see OrderLifecycleManager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// =============================================================================
// ORDER
// =============================================================================

/// One (product, quantity) pair within an order.
///
/// `name` and `image_url` are a snapshot of the catalog entry taken when the
/// order was placed, so later catalog edits don't rewrite order history.
/// Orders written before snapshotting existed have them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl LineItem {
    /// Builds a line item carrying a full snapshot of `product`.
    pub fn snapshot(product: &Product, quantity: i32) -> Self {
        Self {
            product: product.id,
            quantity,
            name: Some(product.name.clone()),
            image_url: Some(product.image_url.clone()),
        }
    }

    pub fn needs_snapshot(&self) -> bool {
        self.name.is_none() || self.image_url.is_none()
    }

    /// Fills the missing snapshot fields from the live catalog entry.
    /// Fields that are already present win.
    pub fn fill_from_catalog(&mut self, product: &Product) {
        if self.name.is_none() {
            self.name = Some(product.name.clone());
        }
        if self.image_url.is_none() {
            self.image_url = Some(product.image_url.clone());
        }
    }
}

/// Delivery address. Every field is optional on input and stored as an
/// empty string when missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShippingAddress {
    #[serde(alias = "fullName")]
    pub name: String,
    pub phone: String,
    #[serde(alias = "line1")]
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Never empty
    pub items: Vec<LineItem>,

    pub total: f64,

    /// Payment provider session id, or the "COD" sentinel
    pub payment_id: Option<String>,

    pub status: OrderStatus,

    pub shipping_address: Option<ShippingAddress>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One requested line of a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product: Uuid,
    pub quantity: i32,
}

/// Request body for placing an order
///
/// # Example JSON
/// ```json
/// {
///   "products": [{ "product": "7d0c…", "quantity": 2 }],
///   "total": 179.0,
///   "paymentId": "cs_test_123",
///   "shippingAddress": { "fullName": "Ada", "line1": "1 Main St", "city": "Oslo" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub products: Vec<OrderItemRequest>,
    pub total: Option<f64>,
    pub payment_id: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOrderResponse {
    pub message: String,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanReviewResponse {
    pub can_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// REVIEWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub user_id: Uuid,
    pub comment: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// At most one review exists per (user, product, order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub order_id: Uuid,
    /// 1..=5
    pub rating: i32,
    pub comment: String,
    pub replies: Vec<Reply>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub product_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReviewRequest {
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

// =============================================================================
// GENERIC RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Detailed readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

/// Individual dependency health checks
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
    pub redis: bool,
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }
}
