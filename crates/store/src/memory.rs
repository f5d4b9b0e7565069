use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{InventoryId, OrderId, ProductId, UserId};
use domain::{
    InventoryLogEntry, InventoryRecord, NewInventoryLog, Order, OrderStatus, Product,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{Store, Transaction},
};

#[derive(Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    inventory: BTreeMap<ProductId, InventoryRecord>,
    orders: HashMap<OrderId, Order>,
    logs: Vec<InventoryLogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Inventory(ProductId),
    Order(OrderId),
}

/// In-memory store implementation for tests and local runs.
///
/// Provides the same transactional contract as the PostgreSQL implementation:
/// row locks are real async mutexes held until the transaction ends, and
/// writes stay private to the transaction until commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<StdMutex<HashMap<RowKey, Arc<Mutex<()>>>>>,
    inventory_seq: Arc<AtomicI64>,
    log_seq: Arc<AtomicI64>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of committed audit rows.
    pub async fn log_count(&self) -> usize {
        self.tables.read().await.logs.len()
    }

    fn row_lock(&self, key: RowKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key).or_default().clone()
    }

    /// Drops the lock entry for `key` once no transaction holds or waits on it.
    ///
    /// Clones are only handed out under the map mutex, so a strong count of
    /// one means the map owns the last reference.
    fn prune_lock(&self, key: RowKey) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
            products: BTreeMap::new(),
            inventory: BTreeMap::new(),
            orders: HashMap::new(),
            logs: Vec::new(),
        })
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Reads see this transaction's own writes first, then committed data.
/// Dropping it without `commit` discards the writes and frees its locks.
pub struct InMemoryTransaction {
    store: InMemoryStore,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    products: BTreeMap<ProductId, Product>,
    inventory: BTreeMap<ProductId, InventoryRecord>,
    orders: HashMap<OrderId, Order>,
    logs: Vec<InventoryLogEntry>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let lock = self.store.row_lock(key);
        let guard = lock.lock_owned().await;
        self.held.insert(key, guard);
    }

    fn release_locks(&mut self) {
        for (key, guard) in self.held.drain() {
            drop(guard);
            self.store.prune_lock(key);
        }
    }

    fn require_lock(&self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld(format!("{key:?}")))
        }
    }

    async fn current_inventory(&self, product_id: ProductId) -> Option<InventoryRecord> {
        if let Some(record) = self.inventory.get(&product_id) {
            return Some(record.clone());
        }
        self.store
            .tables
            .read()
            .await
            .inventory
            .get(&product_id)
            .cloned()
    }

    async fn current_order(&self, order_id: OrderId) -> Option<Order> {
        if let Some(order) = self.orders.get(&order_id) {
            return Some(order.clone());
        }
        self.store.tables.read().await.orders.get(&order_id).cloned()
    }

    /// Committed orders overlaid with this transaction's writes.
    async fn visible_orders(&self) -> Vec<Order> {
        let tables = self.store.tables.read().await;
        let mut merged: HashMap<OrderId, &Order> =
            tables.orders.iter().map(|(id, order)| (*id, order)).collect();
        for (id, order) in &self.orders {
            merged.insert(*id, order);
        }
        merged.into_values().cloned().collect()
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_product(
        &mut self,
        product: &Product,
        initial_stock: u32,
    ) -> Result<InventoryRecord> {
        self.acquire(RowKey::Inventory(product.id)).await;

        {
            let tables = self.store.tables.read().await;
            if tables.products.contains_key(&product.id) || self.products.contains_key(&product.id)
            {
                return Err(StoreError::DuplicateProduct(product.id));
            }
            let sku_taken = tables
                .products
                .values()
                .chain(self.products.values())
                .any(|existing| existing.sku == product.sku);
            if sku_taken {
                return Err(StoreError::DuplicateSku(product.sku.clone()));
            }
        }

        let id = InventoryId::new(self.store.inventory_seq.fetch_add(1, Ordering::SeqCst) + 1);
        let record = InventoryRecord::new(id, product.id, initial_stock, 0)?;
        self.products.insert(product.id, product.clone());
        self.inventory.insert(product.id, record.clone());
        Ok(record)
    }

    async fn products(&mut self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let tables = self.store.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.products
                    .get(id)
                    .or_else(|| tables.products.get(id))
                    .cloned()
            })
            .collect())
    }

    async fn inventories(&mut self, ids: &[ProductId]) -> Result<Vec<InventoryRecord>> {
        let tables = self.store.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.inventory
                    .get(id)
                    .or_else(|| tables.inventory.get(id))
                    .cloned()
            })
            .collect())
    }

    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        self.acquire(RowKey::Inventory(product_id)).await;
        Ok(self.current_inventory(product_id).await)
    }

    async fn save_inventory(&mut self, record: &InventoryRecord) -> Result<()> {
        let product_id = record.product_id();
        self.require_lock(RowKey::Inventory(product_id))?;
        if self.current_inventory(product_id).await.is_none() {
            return Err(StoreError::Corrupt(format!(
                "no inventory row for product {product_id}"
            )));
        }
        self.inventory.insert(product_id, record.clone());
        Ok(())
    }

    async fn append_inventory_log(&mut self, entry: &NewInventoryLog) -> Result<()> {
        if !entry.is_consistent() {
            return Err(StoreError::Corrupt(format!(
                "audit entry {} + {} != {}",
                entry.before, entry.change, entry.after
            )));
        }
        let id = self.store.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.push(InventoryLogEntry {
            id,
            inventory_id: entry.inventory_id,
            counter: entry.counter,
            change: entry.change,
            before: entry.before,
            after: entry.after,
            reason: entry.reason.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn inventory_log(&mut self, product_id: ProductId) -> Result<Vec<InventoryLogEntry>> {
        let Some(record) = self.current_inventory(product_id).await else {
            return Ok(Vec::new());
        };
        let inventory_id = record.id();

        let tables = self.store.tables.read().await;
        let mut entries: Vec<_> = tables
            .logs
            .iter()
            .chain(self.logs.iter())
            .filter(|entry| entry.inventory_id == inventory_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.acquire(RowKey::Order(order.id())).await;
        if self.current_order(order.id()).await.is_some() {
            return Err(StoreError::DuplicateOrder(order.id()));
        }
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.current_order(order_id).await)
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        self.acquire(RowKey::Order(order_id)).await;
        Ok(self.current_order(order_id).await)
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        self.require_lock(RowKey::Order(order.id()))?;
        let existing = self
            .current_order(order.id())
            .await
            .ok_or_else(|| StoreError::Corrupt(format!("no order row {}", order.id())))?;
        let updated = Order::from_parts(order.header().clone(), existing.items().to_vec());
        self.orders.insert(order.id(), updated);
        Ok(())
    }

    async fn order_ids_with_status(&mut self, status: OrderStatus) -> Result<Vec<OrderId>> {
        let mut orders: Vec<_> = self
            .visible_orders()
            .await
            .into_iter()
            .filter(|order| order.status() == status)
            .collect();
        orders.sort_by_key(|order| (order.created_at(), order.id()));
        Ok(orders.into_iter().map(|order| order.id()).collect())
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<_> = self
            .visible_orders()
            .await
            .into_iter()
            .filter(|order| order.is_owned_by(user_id))
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then(a.id().cmp(&b.id()))
        });
        Ok(orders)
    }

    async fn commit(mut self) -> Result<()> {
        let mut tables = self.store.tables.write().await;
        tables.products.append(&mut self.products);
        tables.inventory.append(&mut self.inventory);
        tables.orders.extend(self.orders.drain());
        tables.logs.append(&mut self.logs);
        drop(tables);

        // Locks are released only after the writes are visible.
        self.release_locks();
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}
