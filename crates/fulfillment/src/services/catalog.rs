//! Catalog service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{Product, ProductId};
use thiserror::Error;

/// Errors raised by a catalog backend.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to products.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the product, or `None` if the catalog does not know it.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>, CatalogError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<ProductId, Product>,
    fail_on_get: bool,
}

/// In-memory catalog for tests and database-less deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub fn add_product(&self, product: Product) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.products.insert(product.id.clone(), product);
    }

    /// Toggles whether a product can be ordered. Returns false if unknown.
    pub fn set_active(&self, product_id: &ProductId, active: bool) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.products.get_mut(product_id) {
            Some(product) => {
                product.active = active;
                true
            }
            None => false,
        }
    }

    /// Configures the catalog to fail every lookup.
    pub fn set_fail_on_get(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_get = fail;
    }

    /// Returns the number of products.
    pub fn product_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .products
            .len()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>, CatalogError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_get {
            return Err(CatalogError::Unavailable("lookup disabled".to_string()));
        }
        Ok(state.products.get(product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    #[tokio::test]
    async fn test_add_and_get() {
        let catalog = InMemoryCatalog::new();
        catalog.add_product(Product::new("SKU-001", "Game key", Money::from_cents(1999), 3));

        let product = catalog
            .get_product(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.name, "Game key");
        assert!(catalog
            .get_product(&ProductId::new("SKU-404"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_set_active() {
        let catalog = InMemoryCatalog::new();
        let id = ProductId::new("SKU-001");
        catalog.add_product(Product::new(id.clone(), "Game key", Money::from_cents(1999), 3));

        assert!(catalog.set_active(&id, false));
        assert!(!catalog.get_product(&id).await.unwrap().unwrap().active);
        assert!(!catalog.set_active(&ProductId::new("SKU-404"), false));
    }

    #[tokio::test]
    async fn test_fail_on_get() {
        let catalog = InMemoryCatalog::new();
        catalog.set_fail_on_get(true);
        assert!(catalog.get_product(&ProductId::new("SKU-001")).await.is_err());
    }
}
