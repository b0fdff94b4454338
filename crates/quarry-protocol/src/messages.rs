//! Connection-phase packet layouts.
//!
//! Decoders take a complete logical payload (as produced by the framer)
//! and treat trailing optional fields as absent when the payload ends.

use crate::capability::CapabilityFlags;
use crate::codec::{CodecError, PacketReader, PacketWriter};
use crate::scramble::SCRAMBLE_LENGTH;
use bytes::Bytes;
use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 10;
pub const DEFAULT_SERVER_VERSION: &str = "5.1.0";
/// utf8_general_ci
pub const DEFAULT_CHARSET: u8 = 33;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_PING: u8 = 0x0e;
pub const COM_CHANGE_USER: u8 = 0x11;

const OK_HEADER: u8 = 0x00;
const AUTH_SWITCH_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;
const SEED_PART1_LEN: usize = 8;
const RESERVED_LEN: usize = 23;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unexpected command byte 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedCommand { expected: u8, actual: u8 },
}

fn lossy(bytes: Bytes) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

fn optional(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Initial handshake (protocol version 10), server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub server_version: String,
    pub connection_id: u32,
    pub seed: [u8; SCRAMBLE_LENGTH],
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl Greeting {
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut w = PacketWriter::with_capacity(128);
        w.write_int1(PROTOCOL_VERSION);
        w.write_nul_terminated_string(self.server_version.as_bytes())?;
        w.write_int4(self.connection_id);
        w.write_bytes(&self.seed[..SEED_PART1_LEN]);
        w.write_int1(0);
        w.write_int2(self.capabilities.lower_word());
        w.write_int1(self.charset);
        w.write_int2(self.status_flags);
        w.write_int2(self.capabilities.upper_word());
        // seed length including its trailing 0x00
        w.write_int1(SCRAMBLE_LENGTH as u8 + 1);
        w.write_bytes(&[0u8; 10]);
        w.write_nul_terminated_string(&self.seed[SEED_PART1_LEN..])?;
        w.write_nul_terminated_string(self.auth_plugin_name.as_bytes())?;
        Ok(w.finish())
    }

    pub fn decode(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        let mut r = PacketReader::new(payload);
        let _protocol = r.read_int1()?;
        let server_version = lossy(r.read_nul_terminated_string()?);
        let connection_id = r.read_int4()?;
        let mut seed = [0u8; SCRAMBLE_LENGTH];
        seed[..SEED_PART1_LEN].copy_from_slice(&r.read_fixed_string(SEED_PART1_LEN)?);
        r.skip(1)?;
        let lower = r.read_int2()?;
        let charset = r.read_int1()?;
        let status_flags = r.read_int2()?;
        let upper = r.read_int2()?;
        let _seed_len = r.read_int1()?;
        r.skip(10)?;
        let part2 = r.read_fixed_string(SCRAMBLE_LENGTH - SEED_PART1_LEN)?;
        seed[SEED_PART1_LEN..].copy_from_slice(&part2);
        r.skip(1)?;
        let auth_plugin_name = if r.has_remaining() {
            lossy(r.read_nul_terminated_string()?)
        } else {
            String::new()
        };
        Ok(Self {
            server_version,
            connection_id,
            seed,
            capabilities: CapabilityFlags::from_words(lower, upper),
            charset,
            status_flags,
            auth_plugin_name,
        })
    }
}

/// HandshakeResponse41, client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
    pub connect_attrs: Vec<(String, String)>,
}

impl HandshakeResponse {
    pub fn decode(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        let mut r = PacketReader::new(payload);
        let capabilities = CapabilityFlags::from_bits_retain(r.read_int4()?);
        let max_packet_size = r.read_int4()?;
        let charset = r.read_int1()?;
        // clients are allowed to put anything here
        r.skip(RESERVED_LEN)?;
        let username = lossy(r.read_nul_terminated_string()?);

        let auth_response = if capabilities.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            r.read_len_encoded_string()?
        } else if capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            let len = r.read_int1()? as usize;
            r.read_fixed_string(len)?
        } else {
            r.read_nul_terminated_string()?
        };

        let mut database = None;
        if capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) && r.has_remaining() {
            database = optional(lossy(r.read_nul_terminated_string()?));
        }
        let mut auth_plugin_name = None;
        if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) && r.has_remaining() {
            auth_plugin_name = optional(lossy(r.read_nul_terminated_string()?));
        }
        let mut connect_attrs = Vec::new();
        if capabilities.contains(CapabilityFlags::CONNECT_ATTRS) && r.has_remaining() {
            let block = r.read_len_encoded_string()?;
            let mut attrs = PacketReader::new(block);
            while attrs.has_remaining() {
                let key = lossy(attrs.read_len_encoded_string()?);
                let value = lossy(attrs.read_len_encoded_string()?);
                connect_attrs.push((key, value));
            }
        }

        Ok(Self {
            capabilities,
            max_packet_size,
            charset,
            username,
            auth_response: auth_response.to_vec(),
            database,
            auth_plugin_name,
            connect_attrs,
        })
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let caps = self.capabilities;
        let mut w = PacketWriter::with_capacity(128);
        w.write_int4(caps.bits());
        w.write_int4(self.max_packet_size);
        w.write_int1(self.charset);
        w.write_bytes(&[0u8; RESERVED_LEN]);
        w.write_nul_terminated_string(self.username.as_bytes())?;
        if caps.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            w.write_len_encoded_string(&self.auth_response);
        } else if caps.contains(CapabilityFlags::SECURE_CONNECTION) {
            w.write_int1_prefixed_string(&self.auth_response)?;
        } else {
            w.write_nul_terminated_string(&self.auth_response)?;
        }
        if caps.contains(CapabilityFlags::CONNECT_WITH_DB) {
            let db = self.database.as_deref().unwrap_or_default();
            w.write_nul_terminated_string(db.as_bytes())?;
        }
        if caps.contains(CapabilityFlags::PLUGIN_AUTH) {
            let plugin = self.auth_plugin_name.as_deref().unwrap_or_default();
            w.write_nul_terminated_string(plugin.as_bytes())?;
        }
        if caps.contains(CapabilityFlags::CONNECT_ATTRS) {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.connect_attrs {
                attrs.write_len_encoded_string(key.as_bytes());
                attrs.write_len_encoded_string(value.as_bytes());
            }
            w.write_len_encoded_string(&attrs.finish());
        }
        Ok(w.finish())
    }
}

/// COM_CHANGE_USER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUserPacket {
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub charset: Option<u16>,
    pub auth_plugin_name: Option<String>,
}

impl ChangeUserPacket {
    pub fn decode(payload: impl Into<Bytes>) -> Result<Self, PacketError> {
        let mut r = PacketReader::new(payload);
        let command = r.read_int1()?;
        if command != COM_CHANGE_USER {
            return Err(PacketError::UnexpectedCommand {
                expected: COM_CHANGE_USER,
                actual: command,
            });
        }
        let username = lossy(r.read_nul_terminated_string()?);
        let len = r.read_int1()? as usize;
        let auth_response = r.read_fixed_string(len)?.to_vec();
        let mut database = None;
        if r.has_remaining() {
            database = optional(lossy(r.read_nul_terminated_string()?));
        }
        let mut charset = None;
        if r.remaining() >= 2 {
            charset = Some(r.read_int2()?);
        }
        let mut auth_plugin_name = None;
        if r.has_remaining() {
            auth_plugin_name = optional(lossy(r.read_nul_terminated_string()?));
        }
        Ok(Self {
            username,
            auth_response,
            database,
            charset,
            auth_plugin_name,
        })
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut w = PacketWriter::new();
        w.write_int1(COM_CHANGE_USER);
        w.write_nul_terminated_string(self.username.as_bytes())?;
        w.write_int1_prefixed_string(&self.auth_response)?;
        let db = self.database.as_deref().unwrap_or_default();
        w.write_nul_terminated_string(db.as_bytes())?;
        if let Some(charset) = self.charset {
            w.write_int2(charset);
            if let Some(plugin) = &self.auth_plugin_name {
                w.write_nul_terminated_string(plugin.as_bytes())?;
            }
        }
        Ok(w.finish())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn new() -> Self {
        Self {
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            ..Default::default()
        }
    }

    pub fn encode(&self, capabilities: CapabilityFlags) -> Bytes {
        let mut w = PacketWriter::with_capacity(16);
        w.write_int1(OK_HEADER);
        w.write_vint(self.affected_rows);
        w.write_vint(self.last_insert_id);
        if capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            w.write_int2(self.status_flags);
            w.write_int2(self.warnings);
        }
        w.write_eof_string(self.info.as_bytes());
        w.finish()
    }
}

pub const ER_CON_COUNT_ERROR: u16 = 1040;
pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
pub const ER_BAD_DB_ERROR: u16 = 1049;
pub const ER_MALFORMED_PACKET: u16 = 1835;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state_for(code),
            message: message.into(),
        }
    }

    pub fn encode(&self, capabilities: CapabilityFlags) -> Bytes {
        let mut w = PacketWriter::with_capacity(16 + self.message.len());
        w.write_int1(ERR_HEADER);
        w.write_int2(self.code);
        if capabilities.contains(CapabilityFlags::PROTOCOL_41) {
            w.write_int1(b'#');
            w.write_bytes(&self.sql_state);
        }
        w.write_eof_string(self.message.as_bytes());
        w.finish()
    }
}

fn sql_state_for(code: u16) -> [u8; 5] {
    match code {
        ER_ACCESS_DENIED_ERROR => *b"28000",
        ER_DBACCESS_DENIED_ERROR | ER_BAD_DB_ERROR => *b"42000",
        ER_UNKNOWN_COM_ERROR => *b"08S01",
        ER_CON_COUNT_ERROR => *b"08004",
        _ => *b"HY000",
    }
}

/// Asks the client to redo authentication with another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub seed: [u8; SCRAMBLE_LENGTH],
}

impl AuthSwitchRequest {
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut w = PacketWriter::with_capacity(48);
        w.write_int1(AUTH_SWITCH_HEADER);
        w.write_nul_terminated_string(self.plugin_name.as_bytes())?;
        w.write_nul_terminated_string(&self.seed)?;
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_response(caps: CapabilityFlags) -> HandshakeResponse {
        HandshakeResponse {
            capabilities: caps,
            max_packet_size: 1024000,
            charset: 33,
            username: "user".into(),
            auth_response: (0..20).map(|i| b'a' + i).collect(),
            database: Some("database".into()),
            auth_plugin_name: Some("mysql_native_password".into()),
            connect_attrs: vec![("_client_name".into(), "libmysql".into())],
        }
    }

    #[test]
    fn greeting_layout() {
        let greeting = Greeting {
            server_version: "5.1.0".into(),
            connection_id: 7,
            seed: *b"ABCDEFGHIJKLMNOPQRST",
            capabilities: CapabilityFlags::SERVER_DEFAULT,
            charset: DEFAULT_CHARSET,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: "mysql_native_password".into(),
        };
        let bytes = greeting.encode().expect("encode");
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(&bytes[1..7], b"5.1.0\0");
        assert_eq!(&bytes[7..11], &7u32.to_le_bytes());
        assert_eq!(&bytes[11..19], b"ABCDEFGH");
        assert_eq!(bytes[19], 0);
        // 2 + 1 + 2 + 2 capability/charset/status, then seed length and 10 reserved
        assert_eq!(bytes[27], 21);
        assert_eq!(&bytes[28..38], &[0u8; 10]);
        assert_eq!(&bytes[38..51], b"IJKLMNOPQRST\0");
        assert_eq!(&bytes[51..], b"mysql_native_password\0");

        assert_eq!(Greeting::decode(bytes).expect("decode"), greeting);
    }

    #[test]
    fn handshake_response_all_fields() {
        let caps = CapabilityFlags::SERVER_DEFAULT;
        let packet = client_response(caps);
        let decoded = HandshakeResponse::decode(packet.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn handshake_response_secure_connection_prefix() {
        let caps = CapabilityFlags::PROTOCOL_41
            | CapabilityFlags::SECURE_CONNECTION
            | CapabilityFlags::CONNECT_WITH_DB;
        let mut packet = client_response(caps);
        packet.auth_plugin_name = None;
        packet.connect_attrs.clear();
        let bytes = packet.encode().expect("encode");
        // 4 + 4 + 1 + 23 + "user\0"
        assert_eq!(bytes[37], 20);
        assert_eq!(HandshakeResponse::decode(bytes).expect("decode"), packet);
    }

    #[test]
    fn handshake_response_tolerates_reserved_garbage() {
        let caps = CapabilityFlags::PROTOCOL_41 | CapabilityFlags::SECURE_CONNECTION;
        let mut w = PacketWriter::new();
        w.write_int4(caps.bits());
        w.write_int4(0);
        w.write_int1(33);
        w.write_bytes(&[0xee; 23]);
        w.write_nul_terminated_string(b"bob").unwrap();
        w.write_int1(0);
        let decoded = HandshakeResponse::decode(w.finish()).expect("decode");
        assert_eq!(decoded.username, "bob");
        assert!(decoded.auth_response.is_empty());
        assert_eq!(decoded.database, None);
    }

    #[test]
    fn database_flag_without_bytes_is_absent() {
        let caps = CapabilityFlags::PROTOCOL_41
            | CapabilityFlags::SECURE_CONNECTION
            | CapabilityFlags::CONNECT_WITH_DB
            | CapabilityFlags::PLUGIN_AUTH;
        let mut w = PacketWriter::new();
        w.write_int4(caps.bits());
        w.write_int4(0);
        w.write_int1(33);
        w.write_bytes(&[0; 23]);
        w.write_nul_terminated_string(b"bob").unwrap();
        w.write_int1(0);
        let decoded = HandshakeResponse::decode(w.finish()).expect("decode");
        assert_eq!(decoded.database, None);
        assert_eq!(decoded.auth_plugin_name, None);
    }

    #[test]
    fn truncated_handshake_response_fails() {
        let err = HandshakeResponse::decode(Bytes::from_static(&[0, 0, 0])).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedInput { .. }));
    }

    #[test]
    fn change_user_packet_decodes() {
        let mut w = PacketWriter::new();
        w.write_int1(COM_CHANGE_USER);
        w.write_nul_terminated_string(b"change-user").unwrap();
        w.write_int1(20);
        w.write_bytes(&[b'x'; 20]);
        w.write_nul_terminated_string(b"database").unwrap();
        w.write_int2(33);
        let packet = ChangeUserPacket::decode(w.finish()).expect("decode");
        assert_eq!(packet.username, "change-user");
        assert_eq!(packet.auth_response, vec![b'x'; 20]);
        assert_eq!(packet.database.as_deref(), Some("database"));
        assert_eq!(packet.charset, Some(33));
        assert_eq!(packet.auth_plugin_name, None);
    }

    #[test]
    fn change_user_without_charset() {
        let packet = ChangeUserPacket {
            username: "u".into(),
            auth_response: vec![],
            database: Some("db".into()),
            charset: None,
            auth_plugin_name: None,
        };
        let decoded = ChangeUserPacket::decode(packet.encode().unwrap()).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn change_user_wrong_command() {
        let err = ChangeUserPacket::decode(Bytes::from_static(b"\x03select 1")).unwrap_err();
        assert_eq!(
            err,
            PacketError::UnexpectedCommand {
                expected: COM_CHANGE_USER,
                actual: 0x03
            }
        );
    }

    #[test]
    fn oversized_auth_response_is_not_truncated() {
        let mut packet = client_response(
            CapabilityFlags::PROTOCOL_41 | CapabilityFlags::SECURE_CONNECTION,
        );
        packet.auth_response = vec![b'z'; 300];
        assert!(matches!(
            packet.encode(),
            Err(CodecError::ValueTooLong { len: 300, .. })
        ));

        let change = ChangeUserPacket {
            username: "u".into(),
            auth_response: vec![b'z'; 256],
            database: None,
            charset: None,
            auth_plugin_name: None,
        };
        assert!(matches!(
            change.encode(),
            Err(CodecError::ValueTooLong { len: 256, max: 255 })
        ));
    }

    #[test]
    fn ok_packet_layout() {
        let bytes = OkPacket::new().encode(CapabilityFlags::PROTOCOL_41);
        assert_eq!(&bytes[..], &[0x00, 0, 0, 0x02, 0x00, 0, 0]);
        let bytes = OkPacket::new().encode(CapabilityFlags::empty());
        assert_eq!(&bytes[..], &[0x00, 0, 0]);
    }

    #[test]
    fn err_packet_layout() {
        let err = ErrPacket::new(ER_ACCESS_DENIED_ERROR, "denied");
        let bytes = err.encode(CapabilityFlags::PROTOCOL_41);
        assert_eq!(&bytes[..3], &[0xff, 0x15, 0x04]);
        assert_eq!(&bytes[3..9], b"#28000");
        assert_eq!(&bytes[9..], b"denied");
        let bytes = err.encode(CapabilityFlags::empty());
        assert_eq!(&bytes[3..], b"denied");
    }

    #[test]
    fn auth_switch_layout() {
        let req = AuthSwitchRequest {
            plugin_name: "mysql_native_password".into(),
            seed: *b"ABCDEFGHIJKLMNOPQRST",
        };
        let bytes = req.encode().unwrap();
        assert_eq!(bytes[0], 0xfe);
        assert_eq!(&bytes[1..23], b"mysql_native_password\0");
        assert_eq!(&bytes[23..], b"ABCDEFGHIJKLMNOPQRST\0");
    }
}
