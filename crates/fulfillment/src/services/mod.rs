//! Collaborators the engine talks to: the product catalog, the credential
//! vault and the payment gateway.

pub mod catalog;
pub mod gateway;
pub mod vault;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use gateway::{GatewayError, GatewayInitiation, InMemoryPaymentGateway, PaymentGateway};
pub use vault::{AesGcmVault, CredentialVault, VaultError};
