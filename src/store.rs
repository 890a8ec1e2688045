//! Persistent store seam.
//!
//! The core never implements storage itself; it consumes `ProductStore`
//! through explicit query methods and an explicit scoped transaction around
//! the purchase read-validate-write sequence. A transaction dropped without
//! `commit` rolls back.
//!
//! `MemoryStore` is the bundled implementation used by tests and single-node
//! deployments; production wiring injects a database-backed implementation
//! through [`crate::builder::InventorySystemBuilder`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::product::{Product, ProductId};

/// Authoritative record storage.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Load the authoritative record, `None` if absent.
    async fn load(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Persist a record, assigning an identifier on first save.
    async fn save(&self, product: Product) -> Result<Product, StoreError>;

    /// Open a transaction scoping a read-validate-write sequence.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Scoped store transaction.
///
/// Writes become visible only at `commit`; dropping the transaction without
/// committing discards them.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn load(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn save(&mut self, product: Product) -> Result<Product, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
struct StoreState {
    records: HashMap<ProductId, Product>,
    next_id: ProductId,
}

impl StoreState {
    fn save(&mut self, mut product: Product) -> Product {
        if product.id == 0 {
            self.next_id += 1;
            product.id = self.next_id;
        }
        self.records.insert(product.id, product.clone());
        product
    }
}

/// In-memory product store.
///
/// Transactions take the store's serialization mutex for their whole scope, so
/// concurrent transactions in one process are fully serialized, mirroring the
/// row-lock behavior the purchase path sees from a real database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn load(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn save(&self, product: Product) -> Result<Product, StoreError> {
        let mut state = self.state.lock().await;
        let saved = state.save(product);
        debug!(id = saved.id, "[MemoryStore] Saved product");
        Ok(saved)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    /// Pre-transaction state, restored unless committed.
    snapshot: Option<StoreState>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn load(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.guard.records.get(&id).cloned())
    }

    async fn save(&mut self, product: Product) -> Result<Product, StoreError> {
        Ok(self.guard.save(product))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // Uncommitted transactions roll back when they go out of scope.
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}
