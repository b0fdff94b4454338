//! Collaborator interfaces consumed by the handshake and change-user paths.
//!
//! Both are plain synchronous calls: the implementations own whatever
//! synchronization their backing state needs.

use crate::error::CatalogError;
use crate::types::UserIdentity;

/// Result of checking a client's scrambled password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every identity the login resolved to; the first one becomes current.
    Verified(Vec<UserIdentity>),
    Mismatch,
}

pub trait CredentialService: Send + Sync {
    fn resolve_and_verify(
        &self,
        user: &str,
        remote_host: &str,
        auth_response: &[u8],
        seed: &[u8],
    ) -> Verification;
}

pub trait CatalogService: Send + Sync {
    /// Resolves `name` for `identity`, returning the canonical database name.
    fn bind_database(&self, identity: &UserIdentity, name: &str) -> Result<String, CatalogError>;
}
