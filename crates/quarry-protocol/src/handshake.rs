//! Connection-phase negotiation.
//!
//! ```text
//! Start -> GreetingSent -> AwaitClientResponse
//!       -> [AuthSwitchSent -> AwaitAuthSwitchResponse]
//!       -> Established | Rejected
//! ```
//!
//! Rejections come back as [`Outcome::Rejected`] after the Error packet (if
//! any) has been written. Only channel failures are returned as `Err`; the
//! caller must drop the connection on those.

use crate::auth::{send_rejection, Authenticator};
use crate::capability::CapabilityFlags;
use crate::change_user::ChangeUserHandler;
use crate::channel::Channel;
use crate::framer::TransportError;
use crate::messages::{
    AuthSwitchRequest, Greeting, HandshakeResponse, OkPacket, DEFAULT_CHARSET,
    DEFAULT_SERVER_VERSION, SERVER_STATUS_AUTOCOMMIT,
};
use crate::outcome::{Outcome, Rejection};
use crate::scramble::NATIVE_PASSWORD_PLUGIN;
use crate::session::{HandshakeState, Session};
use quarry_core::{CatalogService, CredentialService};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub server_version: String,
    pub capabilities: CapabilityFlags,
    pub charset: u8,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            capabilities: CapabilityFlags::SERVER_DEFAULT,
            charset: DEFAULT_CHARSET,
        }
    }
}

#[derive(Clone)]
pub struct Negotiator {
    config: HandshakeConfig,
    auth: Authenticator,
}

impl Negotiator {
    pub fn new(
        config: HandshakeConfig,
        credentials: Arc<dyn CredentialService>,
        catalog: Arc<dyn CatalogService>,
    ) -> Self {
        Self {
            config,
            auth: Authenticator::new(credentials, catalog),
        }
    }

    /// A Change-User handler backed by the same services.
    pub fn change_user_handler(&self) -> ChangeUserHandler {
        ChangeUserHandler::from_authenticator(self.auth.clone())
    }

    pub async fn negotiate<C: Channel + ?Sized>(
        &self,
        session: &mut Session,
        channel: &mut C,
    ) -> Result<Outcome, TransportError> {
        session.set_state(HandshakeState::Start);
        let greeting = Greeting {
            server_version: self.config.server_version.clone(),
            connection_id: session.connection_id(),
            seed: *session.seed(),
            capabilities: self.config.capabilities,
            charset: self.config.charset,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        };
        channel.send_and_flush(&greeting.encode()?).await?;
        session.set_state(HandshakeState::GreetingSent);

        session.set_state(HandshakeState::AwaitClientResponse);
        let packet = channel.fetch_one_packet().await?;
        let response = match HandshakeResponse::decode(packet) {
            Ok(response) => response,
            Err(err) => {
                let rejection = Rejection::Malformed(err.to_string());
                return self
                    .reject(session, channel, rejection, self.config.capabilities)
                    .await;
            }
        };
        let capabilities = CapabilityFlags::negotiate(self.config.capabilities, response.capabilities);

        if response.username.is_empty() {
            debug!(connection_id = session.connection_id(), "empty user name, closing silently");
            session.set_state(HandshakeState::Rejected);
            return Ok(Outcome::Rejected(Rejection::EmptyUser));
        }

        let mut auth_response = response.auth_response;
        if needs_auth_switch(capabilities, response.auth_plugin_name.as_deref()) {
            debug!(
                connection_id = session.connection_id(),
                plugin = response.auth_plugin_name.as_deref().unwrap_or_default(),
                "switching client to {NATIVE_PASSWORD_PLUGIN}"
            );
            let request = AuthSwitchRequest {
                plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
                seed: *session.seed(),
            };
            channel.send_and_flush(&request.encode()?).await?;
            session.set_state(HandshakeState::AuthSwitchSent);
            session.set_state(HandshakeState::AwaitAuthSwitchResponse);
            auth_response = channel.fetch_one_packet().await?.to_vec();
        }

        let host = channel.remote_address().to_string();
        let identity = match self
            .auth
            .verify(&response.username, &host, &auth_response, session.seed())
        {
            Ok(identity) => identity,
            Err(rejection) => return self.reject(session, channel, rejection, capabilities).await,
        };
        let database = match self.auth.bind(&identity, response.database.as_deref()) {
            Ok(database) => database,
            Err(rejection) => return self.reject(session, channel, rejection, capabilities).await,
        };

        channel
            .send_and_flush(&OkPacket::new().encode(capabilities))
            .await?;
        if !response.connect_attrs.is_empty() {
            debug!(
                connection_id = session.connection_id(),
                attrs = ?response.connect_attrs,
                "client connect attributes"
            );
        }
        info!(
            connection_id = session.connection_id(),
            user = %identity,
            database = database.as_deref().unwrap_or_default(),
            "connection established"
        );
        session.establish(capabilities, response.charset, identity, database);
        Ok(Outcome::Success)
    }

    async fn reject<C: Channel + ?Sized>(
        &self,
        session: &mut Session,
        channel: &mut C,
        rejection: Rejection,
        capabilities: CapabilityFlags,
    ) -> Result<Outcome, TransportError> {
        info!(
            connection_id = session.connection_id(),
            reason = %rejection,
            "handshake rejected"
        );
        session.set_state(HandshakeState::Rejected);
        send_rejection(channel, &rejection, capabilities).await?;
        Ok(Outcome::Rejected(rejection))
    }
}

/// Only when both sides agreed on plugin auth; otherwise 0xfe reads as the
/// pre-4.1 old-password switch.
fn needs_auth_switch(negotiated: CapabilityFlags, plugin: Option<&str>) -> bool {
    match plugin {
        Some(name) => negotiated.contains(CapabilityFlags::PLUGIN_AUTH) && name != NATIVE_PASSWORD_PLUGIN,
        None => false,
    }
}
