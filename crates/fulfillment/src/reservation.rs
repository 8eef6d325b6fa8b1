//! Multi-product reservation with compensating release.

use std::collections::BTreeMap;

use chrono::Duration;
use domain::{OrderError, Product, ProductId, StockUnit};
use store::Store;

use crate::error::{EngineError, Result};
use crate::ledger::StockLedger;
use crate::services::Catalog;

/// Units held for one order, grouped by product.
#[derive(Debug, Clone)]
pub struct ReservedStock {
    /// Catalog snapshot taken while validating.
    pub products: BTreeMap<ProductId, Product>,
    pub units: BTreeMap<ProductId, Vec<StockUnit>>,
}

impl ReservedStock {
    /// Every held unit, in product order.
    pub fn all_units(&self) -> impl Iterator<Item = &StockUnit> {
        self.units.values().flatten()
    }
}

/// Claims stock across several products as a unit of work.
///
/// Products are claimed one after another in ascending id order. If a later
/// product cannot be satisfied, every unit already claimed in the same call is
/// released before the error is returned.
#[derive(Clone)]
pub struct ReservationCoordinator<S, C> {
    ledger: StockLedger<S, C>,
    catalog: C,
}

impl<S, C> ReservationCoordinator<S, C>
where
    S: Store + Clone,
    C: Catalog + Clone,
{
    pub fn new(ledger: StockLedger<S, C>, catalog: C) -> Self {
        Self { ledger, catalog }
    }

    /// Checks a request without reserving anything.
    ///
    /// Returns the loaded products. The availability check is advisory; a
    /// later reservation may still come up short.
    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        quantities: &BTreeMap<ProductId, u32>,
    ) -> Result<BTreeMap<ProductId, Product>> {
        let products = self.load_products(quantities).await?;

        for (product_id, &quantity) in quantities {
            let available = self.ledger.available_count(product_id).await?;
            if available < u64::from(quantity) {
                return Err(EngineError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available,
                });
            }
        }
        Ok(products)
    }

    /// Rejects empty requests and zero quantities, then loads every product.
    async fn load_products(
        &self,
        quantities: &BTreeMap<ProductId, u32>,
    ) -> Result<BTreeMap<ProductId, Product>> {
        if quantities.is_empty() {
            return Err(EngineError::Validation(
                "at least one product is required".to_string(),
            ));
        }

        let mut products = BTreeMap::new();
        for (product_id, &quantity) in quantities {
            if quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: product_id.clone(),
                    quantity,
                }
                .into());
            }

            let product = self
                .catalog
                .get_product(product_id)
                .await?
                .ok_or_else(|| EngineError::not_found("product", product_id))?;
            if !product.active {
                return Err(EngineError::Validation(format!(
                    "product {product_id} is not available for sale"
                )));
            }
            products.insert(product_id.clone(), product);
        }
        Ok(products)
    }

    /// Holds every requested unit for `ttl`, or nothing.
    #[tracing::instrument(skip(self))]
    pub async fn reserve_for_order(
        &self,
        quantities: &BTreeMap<ProductId, u32>,
        ttl: Duration,
    ) -> Result<ReservedStock> {
        let products = self.load_products(quantities).await?;

        let mut units: BTreeMap<ProductId, Vec<StockUnit>> = BTreeMap::new();
        for (product_id, &quantity) in quantities {
            match self.ledger.reserve(product_id, quantity, ttl).await {
                Ok(claimed) => {
                    units.insert(product_id.clone(), claimed);
                }
                Err(e) => {
                    tracing::warn!(
                        %product_id,
                        error = %e,
                        "reservation failed, releasing earlier claims"
                    );
                    self.release_all(units.values().flatten()).await;
                    return Err(e);
                }
            }
        }

        Ok(ReservedStock { products, units })
    }

    /// Releases every unit, logging instead of failing on individual errors.
    pub async fn release_all<'a>(&self, units: impl IntoIterator<Item = &'a StockUnit>) {
        for unit in units {
            if let Err(e) = self.ledger.release(unit.id).await {
                tracing::error!(unit_id = %unit.id, error = %e, "compensating release failed");
            }
        }
    }
}
