//! Start-up loading of the product catalog.

use std::path::Path;

use domain::Product;
use fulfillment::InMemoryCatalog;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads a JSON array of products into an in-memory catalog.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<InMemoryCatalog, CatalogLoadError> {
    let raw = std::fs::read_to_string(path)?;
    parse_catalog(&raw)
}

pub fn parse_catalog(raw: &str) -> Result<InMemoryCatalog, CatalogLoadError> {
    let products: Vec<Product> = serde_json::from_str(raw)?;
    let catalog = InMemoryCatalog::new();
    for product in products {
        catalog.add_product(product);
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog() {
        let catalog = parse_catalog(
            r#"[
                {"id": "SKU-001", "name": "Game key", "price": 1200, "low_stock_threshold": 5, "active": true},
                {"id": "SKU-002", "name": "DLC key", "price": 500, "low_stock_threshold": 0, "active": false}
            ]"#,
        )
        .unwrap();
        assert_eq!(catalog.product_count(), 2);
    }

    #[test]
    fn test_rejects_malformed_catalog() {
        assert!(matches!(
            parse_catalog(r#"[{"id": "SKU-001"}]"#),
            Err(CatalogLoadError::Parse(_))
        ));
        assert!(matches!(
            load_catalog("/nonexistent/catalog.json"),
            Err(CatalogLoadError::Io(_))
        ));
    }
}
