use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{InventoryId, Money, OrderId, ProductId, UserId};
use domain::{
    InventoryLogEntry, InventoryRecord, NewInventoryLog, Order, OrderHeader, OrderItem,
    OrderStatus, Product, StockCounter,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{Store, Transaction},
};

/// PostgreSQL-backed store implementation.
///
/// Row locks are `SELECT ... FOR UPDATE`; rows inserted by a transaction are
/// implicitly locked until it ends.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction {
            tx,
            locked_inventory: HashSet::new(),
            locked_orders: HashSet::new(),
        })
    }
}

/// Transaction over a [`PostgresStore`]. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    locked_inventory: HashSet<ProductId>,
    locked_orders: HashSet<OrderId>,
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
    })
}

fn row_to_inventory(row: &PgRow) -> Result<InventoryRecord> {
    let record = InventoryRecord::new(
        InventoryId::new(row.try_get("id")?),
        ProductId::new(row.try_get("product_id")?),
        to_u32(row.try_get("quantity")?, "quantity")?,
        to_u32(row.try_get("reserved_quantity")?, "reserved_quantity")?,
    )?;
    Ok(record)
}

fn row_to_header(row: &PgRow) -> Result<OrderHeader> {
    let status: String = row.try_get("status")?;
    Ok(OrderHeader {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        status: status.parse().map_err(StoreError::Corrupt)?,
        total_amount: Money::from_cents(row.try_get("total_cents")?),
        requires_review: row.try_get("requires_review")?,
        review_note: row.try_get("review_note")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem::new(
        ProductId::new(row.try_get("product_id")?),
        to_u32(row.try_get("quantity")?, "quantity")?,
        Money::from_cents(row.try_get("unit_price_cents")?),
    ))
}

fn row_to_log(row: &PgRow) -> Result<InventoryLogEntry> {
    let counter: String = row.try_get("counter")?;
    Ok(InventoryLogEntry {
        id: row.try_get("id")?,
        inventory_id: InventoryId::new(row.try_get("inventory_id")?),
        counter: StockCounter::parse(&counter)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown stock counter: {counter}")))?,
        change: row.try_get("change")?,
        before: to_u32(row.try_get("quantity_before")?, "quantity_before")?,
        after: to_u32(row.try_get("quantity_after")?, "quantity_after")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Maps a unique violation on the products table to a domain error.
fn map_product_insert(err: sqlx::Error, product: &Product) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.constraint() {
            Some("products_pkey") => return StoreError::DuplicateProduct(product.id),
            Some("products_sku_key") => return StoreError::DuplicateSku(product.sku.clone()),
            _ => {}
        }
    }
    StoreError::Database(err)
}

impl PostgresTransaction {
    async fn items_for(&mut self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(row_to_item(row)?);
        }
        Ok(items)
    }

    async fn load_order(&mut self, order_id: OrderId, for_update: bool) -> Result<Option<Order>> {
        let sql = if for_update {
            r#"
            SELECT id, user_id, status, total_cents, requires_review, review_note, created_at, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#
        } else {
            r#"
            SELECT id, user_id, status, total_cents, requires_review, review_note, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#
        };

        let row: Option<PgRow> = sqlx::query(sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let header = row_to_header(&row)?;
        let mut items = self.items_for(&[order_id.as_uuid()]).await?;
        let lines = items.remove(&order_id.as_uuid()).unwrap_or_default();
        Ok(Some(Order::from_parts(header, lines)))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn insert_product(
        &mut self,
        product: &Product,
        initial_stock: u32,
    ) -> Result<InventoryRecord> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, price_cents)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(product.id.get())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price.cents())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_product_insert(e, product))?;

        let row = sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity, reserved_quantity)
            VALUES ($1, $2, 0)
            RETURNING id, product_id, quantity, reserved_quantity
            "#,
        )
        .bind(product.id.get())
        .bind(i64::from(initial_stock))
        .fetch_one(&mut *self.tx)
        .await?;

        self.locked_inventory.insert(product.id);
        row_to_inventory(&row)
    }

    async fn products(&mut self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let raw: Vec<i64> = ids.iter().map(ProductId::get).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, sku, name, price_cents
            FROM products
            WHERE id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(&raw)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn inventories(&mut self, ids: &[ProductId]) -> Result<Vec<InventoryRecord>> {
        let raw: Vec<i64> = ids.iter().map(ProductId::get).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity, reserved_quantity
            FROM inventory
            WHERE product_id = ANY($1)
            ORDER BY product_id ASC
            "#,
        )
        .bind(&raw)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_inventory).collect()
    }

    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, product_id, quantity, reserved_quantity
            FROM inventory
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                self.locked_inventory.insert(product_id);
                Ok(Some(row_to_inventory(&row)?))
            }
            None => Ok(None),
        }
    }

    async fn save_inventory(&mut self, record: &InventoryRecord) -> Result<()> {
        let product_id = record.product_id();
        if !self.locked_inventory.contains(&product_id) {
            return Err(StoreError::LockNotHeld(format!("inventory of product {product_id}")));
        }

        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = $2, reserved_quantity = $3
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.get())
        .bind(i64::from(record.quantity()))
        .bind(i64::from(record.reserved_quantity()))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Corrupt(format!(
                "no inventory row for product {product_id}"
            )));
        }
        Ok(())
    }

    async fn append_inventory_log(&mut self, entry: &NewInventoryLog) -> Result<()> {
        if !entry.is_consistent() {
            return Err(StoreError::Corrupt(format!(
                "audit entry {} + {} != {}",
                entry.before, entry.change, entry.after
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO inventory_logs (inventory_id, counter, change, quantity_before, quantity_after, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.inventory_id.get())
        .bind(entry.counter.as_str())
        .bind(entry.change)
        .bind(i64::from(entry.before))
        .bind(i64::from(entry.after))
        .bind(&entry.reason)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn inventory_log(&mut self, product_id: ProductId) -> Result<Vec<InventoryLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.inventory_id, l.counter, l.change, l.quantity_before, l.quantity_after,
                   l.reason, l.created_at
            FROM inventory_logs l
            JOIN inventory i ON i.id = l.inventory_id
            WHERE i.product_id = $1
            ORDER BY l.id ASC
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_log).collect()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let header = order.header();
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, requires_review, review_note, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(header.id.as_uuid())
        .bind(header.user_id.get())
        .bind(header.total_amount.cents())
        .bind(header.status.as_str())
        .bind(header.requires_review)
        .bind(&header.review_note)
        .bind(header.created_at)
        .bind(header.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::DuplicateOrder(header.id);
            }
            StoreError::Database(e)
        })?;

        for (line_no, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(header.id.as_uuid())
            .bind(line_no as i32)
            .bind(item.product_id.get())
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.cents())
            .execute(&mut *self.tx)
            .await?;
        }

        self.locked_orders.insert(header.id);
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        self.load_order(order_id, false).await
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        let order = self.load_order(order_id, true).await?;
        if order.is_some() {
            self.locked_orders.insert(order_id);
        }
        Ok(order)
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        let header = order.header();
        if !self.locked_orders.contains(&header.id) {
            return Err(StoreError::LockNotHeld(format!("order {}", header.id)));
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, requires_review = $3, review_note = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(header.id.as_uuid())
        .bind(header.status.as_str())
        .bind(header.requires_review)
        .bind(&header.review_note)
        .bind(header.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Corrupt(format!("no order row {}", header.id)));
        }
        Ok(())
    }

    async fn order_ids_with_status(&mut self, status: OrderStatus) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, total_cents, requires_review, review_note, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        let headers: Vec<OrderHeader> = rows.iter().map(row_to_header).collect::<Result<_>>()?;
        let ids: Vec<Uuid> = headers.iter().map(|h| h.id.as_uuid()).collect();
        let mut items = self.items_for(&ids).await?;

        Ok(headers
            .into_iter()
            .map(|header| {
                let lines = items.remove(&header.id.as_uuid()).unwrap_or_default();
                Order::from_parts(header, lines)
            })
            .collect())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
