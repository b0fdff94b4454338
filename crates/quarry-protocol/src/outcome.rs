use crate::messages::{
    ErrPacket, ER_ACCESS_DENIED_ERROR, ER_BAD_DB_ERROR, ER_DBACCESS_DENIED_ERROR,
    ER_MALFORMED_PACKET, ER_UNKNOWN_COM_ERROR,
};
use quarry_core::CatalogError;
use std::fmt;

/// Why an authentication attempt was refused. The connection itself is
/// still intact when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Client sent no user name; nothing is written back.
    EmptyUser,
    Malformed(String),
    UnexpectedCommand(u8),
    NotEstablished,
    AuthenticationFailed {
        user: String,
        host: String,
        using_password: bool,
    },
    DatabaseBind(CatalogError),
}

impl Rejection {
    /// The Error packet reporting this rejection, if one is sent at all.
    pub fn err_packet(&self) -> Option<ErrPacket> {
        let packet = match self {
            Rejection::EmptyUser => return None,
            Rejection::Malformed(reason) => {
                ErrPacket::new(ER_MALFORMED_PACKET, format!("Malformed packet: {reason}"))
            }
            Rejection::UnexpectedCommand(code) => {
                ErrPacket::new(ER_UNKNOWN_COM_ERROR, format!("Unknown command 0x{code:02x}"))
            }
            Rejection::NotEstablished => ErrPacket::new(
                ER_UNKNOWN_COM_ERROR,
                "Change user is only allowed on an authenticated connection",
            ),
            Rejection::AuthenticationFailed {
                user,
                host,
                using_password,
            } => ErrPacket::new(
                ER_ACCESS_DENIED_ERROR,
                format!(
                    "Access denied for user '{user}'@'{host}' (using password: {})",
                    if *using_password { "YES" } else { "NO" }
                ),
            ),
            Rejection::DatabaseBind(err @ CatalogError::AccessDenied { .. }) => {
                ErrPacket::new(ER_DBACCESS_DENIED_ERROR, err.to_string())
            }
            Rejection::DatabaseBind(err) => ErrPacket::new(ER_BAD_DB_ERROR, err.to_string()),
        };
        Some(packet)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyUser => write!(f, "empty user name"),
            Rejection::Malformed(reason) => write!(f, "malformed packet: {reason}"),
            Rejection::UnexpectedCommand(code) => write!(f, "unexpected command 0x{code:02x}"),
            Rejection::NotEstablished => write!(f, "session is not established"),
            Rejection::AuthenticationFailed { user, host, .. } => {
                write!(f, "authentication failed for '{user}'@'{host}'")
            }
            Rejection::DatabaseBind(err) => write!(f, "{err}"),
        }
    }
}

/// Result of a handshake or Change-User that did not hit a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Success => None,
            Outcome::Rejected(rejection) => Some(rejection),
        }
    }
}
