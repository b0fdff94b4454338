pub mod catalog;
pub mod error;
pub mod ids;
pub mod service;
pub mod types;

pub use catalog::{Catalog, DatabaseSchema};
pub use error::CatalogError;
pub use ids::ConnectionIdGenerator;
pub use service::{CatalogService, CredentialService, Verification};
pub use types::UserIdentity;
