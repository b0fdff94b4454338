use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),
    #[error("Access denied for user '{user}' to database '{database}'")]
    AccessDenied { user: String, database: String },
    #[error("database already exists: {0}")]
    DatabaseExists(String),
}
