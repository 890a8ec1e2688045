//! Product record and cache/lock key derivation.
//!
//! The persistent store is the sole source of truth for `Product`; every copy
//! held by a cache tier is a disposable snapshot.

use serde::{Deserialize, Serialize};

/// Store-assigned product identifier.
pub type ProductId = i64;

/// Inventory record shared by all instances.
///
/// `stock` is never negative: the purchase path validates against the
/// authoritative store value under the distributed lock before decrementing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier assigned by the store on first save (`0` = not yet saved).
    pub id: ProductId,
    pub name: String,
    /// Unit price, non-negative.
    pub price: f64,
    /// Units on hand, invariant `>= 0`.
    pub stock: i64,
}

impl Product {
    /// Build an unsaved record; the store assigns the id on `save`.
    pub fn new(name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Input for [`crate::service::ProductService::create_product`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub stock: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Distributed-tier cache key for a product.
#[must_use]
pub fn cache_key(id: ProductId) -> String {
    format!("product:{id}")
}

/// Distributed lock key guarding mutation of a product.
#[must_use]
pub fn lock_key(id: ProductId) -> String {
    format!("lock:product:{id}")
}
