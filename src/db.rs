// =============================================================================
// DATABASE MODULE
// =============================================================================
// PostgreSQL storage: connection pool, schema migrations, product catalog
// queries, and the storage traits used by the order/review core.
//
// NOTES:
// - Order line items, shipping addresses and review replies are JSONB
//   documents (sqlx `Json<T>` wrapper)
// - Stock reservation is ONE conditional UPDATE, so concurrent
//   reservations against a product are serialized by the row lock Postgres
//   takes for the update; no explicit transaction is needed
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    CreateProductRequest, LineItem, Order, OrderStatus, Product, Reply, Review, ShippingAddress,
    UpdateProductRequest,
};
use crate::store::{OrderStore, ProductStockStore, ReviewStore, StoreError, StoreResult};

const PRODUCT_COLUMNS: &str =
    "id, name, description, price, discount, image_url, stock, created_at, updated_at";

const ORDER_COLUMNS: &str =
    "id, user_id, items, total, payment_id, status, shipping_address, created_at, updated_at";

const REVIEW_COLUMNS: &str =
    "id, user_id, product_id, order_id, rating, comment, replies, created_at, updated_at";

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Creates tables and indexes if they don't exist. Safe to run on every
    /// start.
    pub async fn run_migrations(&self, seed_sample_data: bool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name VARCHAR(255) NOT NULL,
                description TEXT,
                price DOUBLE PRECISION NOT NULL,
                discount DOUBLE PRECISION NOT NULL DEFAULT 0,
                image_url TEXT NOT NULL,
                stock INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT non_negative_price CHECK (price >= 0),
                CONSTRAINT discount_percent CHECK (discount >= 0 AND discount <= 100),
                -- The reservation UPDATE never violates this; it is the backstop.
                CONSTRAINT non_negative_stock CHECK (stock >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create products table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_name ON products(name)")
            .execute(&self.pool)
            .await
            .context("Failed to create product name index")?;

        // No foreign key to products: line items keep a snapshot so orders
        // survive catalog deletions.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                items JSONB NOT NULL,
                total DOUBLE PRECISION NOT NULL,
                payment_id TEXT,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                shipping_address JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT non_empty_items CHECK (jsonb_array_length(items) > 0),
                CONSTRAINT known_status CHECK (
                    status IN ('pending', 'paid', 'shipped', 'delivered', 'cancelled')
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create orders table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create orders user index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                product_id UUID NOT NULL,
                order_id UUID NOT NULL REFERENCES orders(id),
                rating INTEGER NOT NULL,
                comment TEXT NOT NULL,
                replies JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT rating_range CHECK (rating BETWEEN 1 AND 5),
                CONSTRAINT one_review_per_order_line UNIQUE (user_id, product_id, order_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create reviews table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reviews_product ON reviews(product_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create reviews product index")?;

        if seed_sample_data {
            self.seed_sample_data().await?;
        }

        Ok(())
    }

    /// Seeds a small catalog when the products table is empty
    async fn seed_sample_data(&self) -> Result<()> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        if count.0 > 0 {
            return Ok(());
        }

        let sample_products = [
            ("Ceramic Teapot", 34.0, "https://cdn.example.com/teapot.png", 25),
            ("Linen Apron", 22.5, "https://cdn.example.com/apron.png", 40),
            ("Cast Iron Pan", 49.9, "https://cdn.example.com/pan.png", 15),
            ("Chef Knife", 79.0, "https://cdn.example.com/knife.png", 10),
            ("Herb Planter", 18.0, "https://cdn.example.com/planter.png", 60),
        ];

        for (name, price, image_url, stock) in sample_products {
            sqlx::query(
                "INSERT INTO products (name, price, image_url, stock) VALUES ($1, $2, $3, $4)",
            )
            .bind(name)
            .bind(price)
            .bind(image_url)
            .bind(stock)
            .execute(&self.pool)
            .await?;
        }

        tracing::info!(count = sample_products.len(), "Seeded sample products");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // PRODUCT CATALOG
    // -------------------------------------------------------------------------

    pub async fn list_products(&self) -> StoreResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    pub async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    pub async fn create_product(&self, req: &CreateProductRequest) -> StoreResult<Product> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (name, description, price, discount, image_url, stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(req.price)
        .bind(req.discount)
        .bind(req.image_url.trim())
        .bind(req.stock)
        .fetch_one(&self.pool)
        .await?;
        Ok(product)
    }

    /// Partial update; absent fields keep their value. `None` if the product
    /// does not exist.
    pub async fn update_product(
        &self,
        product_id: Uuid,
        req: &UpdateProductRequest,
    ) -> StoreResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                discount = COALESCE($5, discount),
                image_url = COALESCE($6, image_url),
                stock = COALESCE($7, stock),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(req.price)
        .bind(req.discount)
        .bind(req.image_url.as_deref().map(str::trim))
        .bind(req.stock)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    pub async fn delete_product(&self, product_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // HEALTH CHECK
    // -------------------------------------------------------------------------

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================
// JSONB and TEXT columns are decoded into intermediate rows first, then
// converted into the domain types.

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    items: Json<Vec<LineItem>>,
    total: f64,
    payment_id: Option<String>,
    status: String,
    shipping_address: Option<Json<ShippingAddress>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row.status.parse().map_err(|bad| {
            StoreError::Corrupt(format!("order {} has unknown status '{bad}'", row.id))
        })?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            total: row.total,
            payment_id: row.payment_id,
            status,
            shipping_address: row.shipping_address.map(|Json(address)| address),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn orders_from_rows(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

#[derive(FromRow)]
struct ReviewRow {
    id: Uuid,
    user_id: Uuid,
    product_id: Uuid,
    order_id: Uuid,
    rating: i32,
    comment: String,
    replies: Json<Vec<Reply>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: row.id,
            user_id: row.user_id,
            product_id: row.product_id,
            order_id: row.order_id,
            rating: row.rating,
            comment: row.comment,
            replies: row.replies.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

// =============================================================================
// STORAGE TRAIT IMPLEMENTATIONS
// =============================================================================

#[async_trait]
impl ProductStockStore for Database {
    async fn reserve(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<Product>> {
        // Check and decrement in one statement: no read-then-write window.
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn restore(&self, product_id: Uuid, quantity: i32) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }
        Ok(())
    }

    async fn find_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        self.get_product(product_id).await
    }
}

#[async_trait]
impl OrderStore for Database {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, items, total, payment_id, status, shipping_address,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(Json(&order.items))
        .bind(order.total)
        .bind(&order.payment_id)
        .bind(order.status.as_str())
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_for_user(&self, order_id: Uuid, user_id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        orders_from_rows(rows)
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        orders_from_rows(rows)
    }

    async fn set_status(&self, order_id: Uuid, status: OrderStatus) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status <> 'cancelled'
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn transition_status(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE orders SET status = $4, updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND status = $3
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(user_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn replace_items(&self, order_id: Uuid, items: &[LineItem]) -> StoreResult<()> {
        let result = sqlx::query("UPDATE orders SET items = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(Json(items))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for Database {
    async fn insert(&self, review: &Review) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews
                (id, user_id, product_id, order_id, rating, comment, replies,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(review.id)
        .bind(review.user_id)
        .bind(review.product_id)
        .bind(review.order_id)
        .bind(review.rating)
        .bind(&review.comment)
        .bind(Json(&review.replies))
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "review for product {} in order {}",
                review.product_id, review.order_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists_for(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        order_id: Uuid,
    ) -> StoreResult<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM reviews
                WHERE user_id = $1 AND product_id = $2 AND order_id = $3
            )
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    async fn list_for_product(&self, product_id: Uuid) -> StoreResult<Vec<Review>> {
        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE product_id = $1 ORDER BY created_at DESC"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Review::from).collect())
    }

    async fn append_reply(&self, review_id: Uuid, reply: &Reply) -> StoreResult<Option<Review>> {
        // jsonb array concatenation appends in place; concurrent replies
        // can't overwrite each other.
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            UPDATE reviews
            SET replies = replies || $2::jsonb, updated_at = NOW()
            WHERE id = $1
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(review_id)
        .bind(Json([reply]))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Review::from))
    }

    async fn update_content(
        &self,
        review_id: Uuid,
        user_id: Uuid,
        rating: Option<i32>,
        comment: Option<String>,
    ) -> StoreResult<Option<Review>> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            UPDATE reviews
            SET rating = COALESCE($3, rating),
                comment = COALESCE($4, comment),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(review_id)
        .bind(user_id)
        .bind(rating)
        .bind(comment)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Review::from))
    }

    async fn delete(&self, review_id: Uuid, owner: Option<Uuid>) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM reviews WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)",
        )
        .bind(review_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
