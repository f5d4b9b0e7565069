use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{
    InventoryLogEntry, InventoryRecord, NewInventoryLog, Order, OrderStatus, Product,
};

use crate::Result;

/// Core trait for data store implementations.
///
/// All implementations must be thread-safe and cheap to clone; clones share
/// the same underlying data and locks.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// The transaction type handed out by `begin`.
    type Tx: Transaction + 'static;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work against the store.
///
/// Row locks taken with `lock_*` are exclusive and held until the
/// transaction ends. Writes to inventory and order rows require the row lock.
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Creates a product and its inventory row (one-to-one) with `initial_stock` on hand.
    async fn insert_product(
        &mut self,
        product: &Product,
        initial_stock: u32,
    ) -> Result<InventoryRecord>;

    /// Unlocked read of catalog products. Missing ids are omitted.
    async fn products(&mut self, ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Unlocked read of inventory rows in one round trip. Missing ids are omitted.
    async fn inventories(&mut self, ids: &[ProductId]) -> Result<Vec<InventoryRecord>>;

    /// Locks the inventory row of `product_id` exclusively and returns it.
    ///
    /// Blocks while another transaction holds the lock. Returns `None` when no
    /// inventory row exists.
    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>>;

    /// Writes back counters of a row locked by this transaction.
    async fn save_inventory(&mut self, record: &InventoryRecord) -> Result<()>;

    /// Appends an audit row.
    async fn append_inventory_log(&mut self, entry: &NewInventoryLog) -> Result<()>;

    /// Audit rows for a product, oldest first.
    async fn inventory_log(&mut self, product_id: ProductId) -> Result<Vec<InventoryLogEntry>>;

    /// Inserts a new order with its lines and takes its row lock.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Unlocked read of an order with its lines.
    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Locks the order row exclusively and returns the order with its lines.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Writes back the header (status, review flag, timestamps) of an order
    /// locked by this transaction. Lines are immutable after creation.
    async fn save_order(&mut self, order: &Order) -> Result<()>;

    /// Ids of orders currently in `status`, oldest first.
    async fn order_ids_with_status(&mut self, status: OrderStatus) -> Result<Vec<OrderId>>;

    /// Orders owned by `user_id`, newest first.
    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>>;

    /// Makes all writes visible and releases every lock.
    async fn commit(self) -> Result<()>;

    /// Discards all writes and releases every lock.
    async fn rollback(self) -> Result<()>;
}

/// Ends a transaction according to the outcome of its body: commit on `Ok`,
/// roll back on `Err`.
///
/// ```ignore
/// let mut tx = store.begin().await?;
/// let result = do_work(&mut tx).await;
/// finish(tx, result).await
/// ```
pub async fn finish<T, E, Tx>(tx: Tx, result: std::result::Result<T, E>) -> std::result::Result<T, E>
where
    Tx: Transaction,
    E: From<crate::StoreError> + std::fmt::Display,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::warn!(error = %err, "transaction rolled back");
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
