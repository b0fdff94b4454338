use crate::capability::CapabilityFlags;
use crate::channel::Channel;
use crate::framer::TransportError;
use crate::outcome::Rejection;
use quarry_core::{CatalogService, CredentialService, UserIdentity, Verification};
use std::sync::Arc;
use tracing::warn;

/// Identity check plus database binding, shared by the handshake and
/// Change-User paths.
#[derive(Clone)]
pub(crate) struct Authenticator {
    credentials: Arc<dyn CredentialService>,
    catalog: Arc<dyn CatalogService>,
}

impl Authenticator {
    pub(crate) fn new(
        credentials: Arc<dyn CredentialService>,
        catalog: Arc<dyn CatalogService>,
    ) -> Self {
        Self {
            credentials,
            catalog,
        }
    }

    pub(crate) fn verify(
        &self,
        user: &str,
        host: &str,
        auth_response: &[u8],
        seed: &[u8],
    ) -> Result<UserIdentity, Rejection> {
        let denied = || Rejection::AuthenticationFailed {
            user: user.to_string(),
            host: host.to_string(),
            using_password: !auth_response.is_empty(),
        };
        match self
            .credentials
            .resolve_and_verify(user, host, auth_response, seed)
        {
            Verification::Verified(identities) => match identities.into_iter().next() {
                Some(identity) => Ok(identity),
                None => {
                    warn!(user, host, "credential service verified an empty identity set");
                    Err(denied())
                }
            },
            Verification::Mismatch => Err(denied()),
        }
    }

    pub(crate) fn bind(
        &self,
        identity: &UserIdentity,
        database: Option<&str>,
    ) -> Result<Option<String>, Rejection> {
        match database {
            None => Ok(None),
            Some(name) => self
                .catalog
                .bind_database(identity, name)
                .map(Some)
                .map_err(Rejection::DatabaseBind),
        }
    }
}

/// Writes the Error packet for `rejection`, if it has one.
pub(crate) async fn send_rejection<C: Channel + ?Sized>(
    channel: &mut C,
    rejection: &Rejection,
    capabilities: CapabilityFlags,
) -> Result<(), TransportError> {
    if let Some(packet) = rejection.err_packet() {
        channel.send_and_flush(&packet.encode(capabilities)).await?;
    }
    Ok(())
}
