use crate::auth::{send_rejection, Authenticator};
use crate::channel::Channel;
use crate::framer::TransportError;
use crate::messages::{ChangeUserPacket, OkPacket, PacketError};
use crate::outcome::{Outcome, Rejection};
use crate::session::Session;
use bytes::Bytes;
use quarry_core::{CatalogService, CredentialService, UserIdentity};
use std::sync::Arc;
use tracing::info;

/// Re-authenticates an established session in place (COM_CHANGE_USER).
///
/// The seed drawn for the greeting is reused. Identity, database and charset
/// change together or not at all; the session stays established either way.
#[derive(Clone)]
pub struct ChangeUserHandler {
    auth: Authenticator,
}

impl ChangeUserHandler {
    pub fn new(credentials: Arc<dyn CredentialService>, catalog: Arc<dyn CatalogService>) -> Self {
        Self::from_authenticator(Authenticator::new(credentials, catalog))
    }

    pub(crate) fn from_authenticator(auth: Authenticator) -> Self {
        Self { auth }
    }

    pub async fn change_user<C: Channel + ?Sized>(
        &self,
        session: &mut Session,
        channel: &mut C,
        payload: Bytes,
    ) -> Result<Outcome, TransportError> {
        match self.try_change_user(session, channel, payload) {
            Ok(commit) => {
                channel
                    .send_and_flush(&OkPacket::new().encode(session.capabilities()))
                    .await?;
                info!(
                    connection_id = session.connection_id(),
                    user = %commit.identity,
                    "user changed"
                );
                session.replace_identity(commit.identity, commit.database, commit.charset);
                Ok(Outcome::Success)
            }
            Err(rejection) => {
                info!(
                    connection_id = session.connection_id(),
                    reason = %rejection,
                    "change user rejected"
                );
                send_rejection(channel, &rejection, session.capabilities()).await?;
                Ok(Outcome::Rejected(rejection))
            }
        }
    }

    fn try_change_user<C: Channel + ?Sized>(
        &self,
        session: &Session,
        channel: &C,
        payload: Bytes,
    ) -> Result<Commit, Rejection> {
        if !session.is_established() {
            return Err(Rejection::NotEstablished);
        }
        let packet = ChangeUserPacket::decode(payload).map_err(|err| match err {
            PacketError::UnexpectedCommand { actual, .. } => Rejection::UnexpectedCommand(actual),
            PacketError::Codec(err) => Rejection::Malformed(err.to_string()),
        })?;
        let host = channel.remote_address();
        if packet.username.is_empty() {
            return Err(Rejection::AuthenticationFailed {
                user: String::new(),
                host: host.to_string(),
                using_password: !packet.auth_response.is_empty(),
            });
        }
        let identity =
            self.auth
                .verify(&packet.username, host, &packet.auth_response, session.seed())?;
        let database = self.auth.bind(&identity, packet.database.as_deref())?;
        Ok(Commit {
            identity,
            database,
            charset: packet.charset.and_then(|c| u8::try_from(c).ok()),
        })
    }
}

struct Commit {
    identity: UserIdentity,
    database: Option<String>,
    charset: Option<u8>,
}
