use crate::error::CatalogError;
use crate::service::CatalogService;
use crate::types::UserIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const ALL_DATABASES: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub name: String,
}

/// Databases known to this front end plus per-user access grants.
///
/// Names are matched case-insensitively; the spelling used at creation is
/// what `bind_database` hands back.
#[derive(Debug, Default)]
pub struct Catalog {
    databases: HashMap<String, DatabaseSchema>,
    grants: HashMap<String, HashSet<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            databases: HashMap::new(),
            grants: HashMap::new(),
        }
    }

    pub fn create_database(&mut self, name: &str) -> Result<(), CatalogError> {
        let key = name.to_lowercase();
        if self.databases.contains_key(&key) {
            return Err(CatalogError::DatabaseExists(name.to_string()));
        }
        self.databases.insert(
            key,
            DatabaseSchema {
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn get_database(&self, name: &str) -> Option<&DatabaseSchema> {
        self.databases.get(&name.to_lowercase())
    }

    /// Grants `user` access to `database`, or to every database with `*`.
    pub fn grant(&mut self, user: &str, database: &str) {
        self.grants
            .entry(user.to_string())
            .or_default()
            .insert(database.to_lowercase());
    }

    pub fn has_access(&self, user: &str, database: &str) -> bool {
        self.grants
            .get(user)
            .map(|dbs| dbs.contains(ALL_DATABASES) || dbs.contains(&database.to_lowercase()))
            .unwrap_or(false)
    }
}

impl CatalogService for Catalog {
    fn bind_database(&self, identity: &UserIdentity, name: &str) -> Result<String, CatalogError> {
        let schema = self
            .get_database(name)
            .ok_or_else(|| CatalogError::UnknownDatabase(name.to_string()))?;
        if !self.has_access(&identity.user, &schema.name) {
            return Err(CatalogError::AccessDenied {
                user: identity.user.clone(),
                database: schema.name.clone(),
            });
        }
        Ok(schema.name.clone())
    }
}
