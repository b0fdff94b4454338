use crate::capability::CapabilityFlags;
use crate::messages::DEFAULT_CHARSET;
use crate::scramble::{create_random_string, SCRAMBLE_LENGTH};
use quarry_core::UserIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    GreetingSent,
    AwaitClientResponse,
    AuthSwitchSent,
    AwaitAuthSwitchResponse,
    Established,
    Rejected,
}

/// Per-connection protocol state.
///
/// The seed is drawn once, here, and reused by every later Change-User on
/// the same connection.
#[derive(Debug, Clone)]
pub struct Session {
    connection_id: u32,
    seed: [u8; SCRAMBLE_LENGTH],
    capabilities: CapabilityFlags,
    charset: u8,
    identity: Option<UserIdentity>,
    database: Option<String>,
    state: HandshakeState,
}

impl Session {
    pub fn new(connection_id: u32) -> Self {
        let mut seed = [0u8; SCRAMBLE_LENGTH];
        seed.copy_from_slice(&create_random_string(SCRAMBLE_LENGTH));
        Self::with_seed(connection_id, seed)
    }

    /// A session with a caller-chosen seed, for deterministic exchanges.
    pub fn with_seed(connection_id: u32, seed: [u8; SCRAMBLE_LENGTH]) -> Self {
        Self {
            connection_id,
            seed,
            capabilities: CapabilityFlags::empty(),
            charset: DEFAULT_CHARSET,
            identity: None,
            database: None,
            state: HandshakeState::Start,
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn seed(&self) -> &[u8; SCRAMBLE_LENGTH] {
        &self.seed
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Switches the current database after the catalog accepted it.
    pub fn set_database(&mut self, database: impl Into<String>) {
        self.database = Some(database.into());
    }

    pub(crate) fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    pub(crate) fn establish(
        &mut self,
        capabilities: CapabilityFlags,
        charset: u8,
        identity: UserIdentity,
        database: Option<String>,
    ) {
        self.capabilities = capabilities;
        self.charset = charset;
        self.identity = Some(identity);
        self.database = database;
        self.state = HandshakeState::Established;
    }

    /// Commits a Change-User: identity, database and (optionally) charset together.
    pub(crate) fn replace_identity(
        &mut self,
        identity: UserIdentity,
        database: Option<String>,
        charset: Option<u8>,
    ) {
        self.identity = Some(identity);
        self.database = database;
        if let Some(charset) = charset {
            self.charset = charset;
        }
    }
}
