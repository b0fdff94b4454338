//! MySQL-compatible connection phase: wire codec, packet framing, the
//! `mysql_native_password` scramble, handshake negotiation and Change-User.

mod auth;
pub mod capability;
pub mod change_user;
pub mod channel;
pub mod codec;
pub mod framer;
pub mod handshake;
pub mod messages;
pub mod outcome;
pub mod scramble;
pub mod session;

pub use capability::CapabilityFlags;
pub use change_user::ChangeUserHandler;
pub use channel::{Channel, StreamChannel};
pub use codec::{CodecError, PacketReader, PacketWriter};
pub use framer::{PacketFramer, TransportError};
pub use handshake::{HandshakeConfig, Negotiator};
pub use outcome::{Outcome, Rejection};
pub use session::{HandshakeState, Session};
