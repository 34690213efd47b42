//! Connection handshake between a client and a cache server.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::locator::CLIENT_VERSION_ORDINAL;
use crate::error::{GeodeError, Result};
use crate::serialization::{
    ds_code, modified_utf8, read_typed_string, write_typed_string, DataInput, DataOutput,
    ObjectDataInput, ObjectDataOutput,
};

/// Acknowledges the request side of a handshake.
pub const REPLY_OK: u8 = 59;
/// The server refused the connection.
pub const REPLY_REFUSED: u8 = 60;
/// The handshake was malformed.
pub const REPLY_INVALID: u8 = 61;
/// The server requires credentials.
pub const REPLY_AUTHENTICATION_REQUIRED: u8 = 62;
/// The server rejected the credentials.
pub const REPLY_AUTHENTICATION_FAILED: u8 = 63;
/// A durable client with the same id is connected.
pub const REPLY_DUPLICATE_DURABLE_CLIENT: u8 = 64;
/// A subscription channel was accepted.
pub const SUCCESSFUL_SERVER_TO_CLIENT: u8 = 105;
/// A subscription channel was refused.
pub const UNSUCCESSFUL_SERVER_TO_CLIENT: u8 = 106;
/// The server only accepts TLS connections.
pub const REPLY_SSL_ENABLED: u8 = 21;

/// No credentials follow the handshake.
pub const SECURITY_CREDENTIALS_NONE: u8 = 0;

const TOKEN_ORDINAL: u8 = 0xFF;

/// The purpose of a connection, announced as the first handshake byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicationMode {
    /// Request/response traffic.
    ClientToServer,
    /// Subscription channel to the primary queue.
    PrimaryServerToClient,
    /// Subscription channel to a redundant queue.
    SecondaryServerToClient,
}

impl CommunicationMode {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            CommunicationMode::ClientToServer => 100,
            CommunicationMode::PrimaryServerToClient => 101,
            CommunicationMode::SecondaryServerToClient => 102,
        }
    }

    /// Parses a wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            100 => Ok(CommunicationMode::ClientToServer),
            101 => Ok(CommunicationMode::PrimaryServerToClient),
            102 => Ok(CommunicationMode::SecondaryServerToClient),
            other => Err(GeodeError::Protocol(format!(
                "unknown communication mode {}",
                other
            ))),
        }
    }

    /// Returns true for subscription channels.
    pub fn is_notification(self) -> bool {
        self != CommunicationMode::ClientToServer
    }
}

/// State of the subscription queue reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// The server hosts no queue for this client.
    NonRedundant,
    /// The server hosts a redundant queue.
    Redundant,
    /// The server hosts the primary queue.
    Primary,
}

impl QueueStatus {
    fn code(self) -> u8 {
        match self {
            QueueStatus::NonRedundant => 0,
            QueueStatus::Redundant => 1,
            QueueStatus::Primary => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => QueueStatus::Redundant,
            2 => QueueStatus::Primary,
            _ => QueueStatus::NonRedundant,
        }
    }
}

/// Identity of a client process, embedded in handshakes and event ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientMemberId {
    /// Host the client runs on.
    pub hostname: String,
    /// Process id of the client.
    pub process_id: i32,
    /// Unique tag distinguishing clients on the same host.
    pub unique_tag: String,
    /// Durable client id, if the client is durable.
    pub durable_id: Option<String>,
    /// Seconds the server keeps a durable queue after disconnect.
    pub durable_timeout_secs: i32,
}

impl ClientMemberId {
    /// Returns true if the client has a durable id.
    pub fn is_durable(&self) -> bool {
        self.durable_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Serializes the id as a fixed-id object.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut output = ObjectDataOutput::new();
        output.write_byte(ds_code::FIXED_ID_BYTE)?;
        output.write_byte(ds_code::CLIENT_PROXY_MEMBERSHIP_ID)?;
        write_typed_string(&mut output, Some(self.hostname.as_str()))?;
        output.write_int(self.process_id)?;
        write_typed_string(&mut output, Some(self.unique_tag.as_str()))?;
        write_typed_string(&mut output, self.durable_id.as_deref())?;
        output.write_int(self.durable_timeout_secs)?;
        Ok(output.into_bytes())
    }

    /// Deserializes an id written by [`ClientMemberId::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = ObjectDataInput::new(data);
        let code = input.read_byte()?;
        let id = input.read_byte()?;
        if code != ds_code::FIXED_ID_BYTE || id != ds_code::CLIENT_PROXY_MEMBERSHIP_ID {
            return Err(GeodeError::Serialization(format!(
                "not a client membership id: {} {}",
                code, id
            )));
        }
        Ok(Self {
            hostname: read_typed_string(&mut input)?.unwrap_or_default(),
            process_id: input.read_int()?,
            unique_tag: read_typed_string(&mut input)?.unwrap_or_default(),
            durable_id: read_typed_string(&mut input)?,
            durable_timeout_secs: input.read_int()?,
        })
    }
}

/// The client side of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Purpose of the connection.
    pub mode: CommunicationMode,
    /// Client version ordinal.
    pub version_ordinal: i16,
    /// Read timeout in milliseconds, sent on request channels only.
    pub read_timeout_ms: i32,
    /// Serialized [`ClientMemberId`].
    pub member_id: Vec<u8>,
    /// Conflation override for subscription channels (0 = server default).
    pub conflation: u8,
}

impl HandshakeRequest {
    /// Creates a request for `mode` announcing the current version.
    pub fn new(mode: CommunicationMode, read_timeout_ms: i32, member_id: Vec<u8>) -> Self {
        Self {
            mode,
            version_ordinal: CLIENT_VERSION_ORDINAL,
            read_timeout_ms,
            member_id,
            conflation: 0,
        }
    }

    /// Encodes the request.
    pub fn encode(&self) -> Result<Bytes> {
        let mut output = ObjectDataOutput::new();
        output.write_ubyte(self.mode.code())?;
        if (0..=127).contains(&self.version_ordinal) {
            output.write_ubyte(self.version_ordinal as u8)?;
        } else {
            output.write_ubyte(TOKEN_ORDINAL)?;
            output.write_short(self.version_ordinal)?;
        }
        output.write_ubyte(REPLY_OK)?;
        if !self.mode.is_notification() {
            output.write_int(self.read_timeout_ms)?;
        }
        output.write_byte_array(Some(self.member_id.as_slice()))?;
        output.write_ubyte(self.conflation)?;
        output.write_ubyte(SECURITY_CREDENTIALS_NONE)?;
        Ok(output.freeze())
    }
}

/// The server side of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Acceptance code.
    pub acceptance: u8,
    /// Queue status, meaningful on subscription channels.
    pub queue_status: QueueStatus,
    /// Number of events queued for the client.
    pub queue_size: i32,
    /// Serialized member id of the server, on request channels.
    pub server_member_id: Vec<u8>,
    /// Message from the server; the reason on refusals.
    pub message: String,
    /// True if the server accepts delta propagation.
    pub delta_enabled: bool,
}

impl HandshakeResponse {
    /// Creates an accepting response for `mode`.
    pub fn accepted(mode: CommunicationMode, queue_status: QueueStatus) -> Self {
        Self {
            acceptance: if mode.is_notification() {
                SUCCESSFUL_SERVER_TO_CLIENT
            } else {
                REPLY_OK
            },
            queue_status,
            queue_size: 0,
            server_member_id: Vec::new(),
            message: String::new(),
            delta_enabled: false,
        }
    }

    /// Creates a refusing response with `code` and a reason.
    pub fn refused(code: u8, message: impl Into<String>) -> Self {
        Self {
            acceptance: code,
            queue_status: QueueStatus::NonRedundant,
            queue_size: 0,
            server_member_id: Vec::new(),
            message: message.into(),
            delta_enabled: false,
        }
    }

    /// Returns true if the handshake was accepted.
    pub fn is_accepted(&self) -> bool {
        is_accepting(self.acceptance)
    }

    /// Maps a refusal to the matching error.
    pub fn into_result(self) -> Result<Self> {
        let message = self.message.clone();
        match self.acceptance {
            REPLY_OK | SUCCESSFUL_SERVER_TO_CLIENT => Ok(self),
            REPLY_SSL_ENABLED => Err(GeodeError::Ssl(format!(
                "server requires an SSL connection: {}",
                message
            ))),
            REPLY_AUTHENTICATION_REQUIRED => Err(GeodeError::AuthenticationRequired(message)),
            REPLY_AUTHENTICATION_FAILED => Err(GeodeError::AuthenticationFailed(message)),
            REPLY_DUPLICATE_DURABLE_CLIENT => Err(GeodeError::DuplicateDurableClient(message)),
            REPLY_REFUSED | REPLY_INVALID | UNSUCCESSFUL_SERVER_TO_CLIENT => {
                Err(GeodeError::NotConnected(format!(
                    "handshake rejected with code {}: {}",
                    self.acceptance, message
                )))
            }
            other => Err(GeodeError::Protocol(format!(
                "unknown handshake acceptance code {}",
                other
            ))),
        }
    }

    /// Encodes the response for a channel of `mode`.
    pub fn encode(&self, mode: CommunicationMode) -> Result<Bytes> {
        let mut output = ObjectDataOutput::new();
        output.write_ubyte(self.acceptance)?;
        if self.is_accepted() {
            output.write_ubyte(self.queue_status.code())?;
            output.write_int(self.queue_size)?;
            if !mode.is_notification() {
                output.write_byte_array(Some(self.server_member_id.as_slice()))?;
            }
            output.write_utf(&self.message)?;
            if !mode.is_notification() {
                output.write_bool(self.delta_enabled)?;
            }
        } else {
            output.write_utf(&self.message)?;
        }
        Ok(output.freeze())
    }
}

fn is_accepting(code: u8) -> bool {
    code == REPLY_OK || code == SUCCESSFUL_SERVER_TO_CLIENT
}

/// Non-consuming reader used to check whether a handshake is complete.
struct Peek<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Peek<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn byte_array(&mut self) -> Option<&'a [u8]> {
        let len = match self.u8()? {
            255 => 0,
            254 => self.u16()? as usize,
            253 => self.i32()?.max(0) as usize,
            n => n as usize,
        };
        self.take(len)
    }

    fn utf(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

/// Decodes the server's handshake response for a channel of a given mode.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeResponseDecoder {
    mode: CommunicationMode,
}

impl HandshakeResponseDecoder {
    /// Creates a decoder for a channel of `mode`.
    pub fn new(mode: CommunicationMode) -> Self {
        Self { mode }
    }
}

impl Decoder for HandshakeResponseDecoder {
    type Item = HandshakeResponse;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let mut peek = Peek::new(src);
        let Some(acceptance) = peek.u8() else {
            return Ok(None);
        };

        let notification = self.mode.is_notification();
        let parsed = if is_accepting(acceptance) {
            (|| {
                let queue_status = QueueStatus::from_code(peek.u8()?);
                let queue_size = peek.i32()?;
                let server_member_id = if notification {
                    Vec::new()
                } else {
                    peek.byte_array()?.to_vec()
                };
                let message = peek.utf()?;
                let delta_enabled = if notification { false } else { peek.u8()? != 0 };
                Some((queue_status, queue_size, server_member_id, message, delta_enabled))
            })()
        } else {
            peek.utf()
                .map(|message| (QueueStatus::NonRedundant, 0, Vec::new(), message, false))
        };

        let Some((queue_status, queue_size, server_member_id, message, delta_enabled)) = parsed
        else {
            return Ok(None);
        };
        let message = modified_utf8::decode(message)?;
        let consumed = peek.pos;
        src.advance(consumed);

        Ok(Some(HandshakeResponse {
            acceptance,
            queue_status,
            queue_size,
            server_member_id,
            message,
            delta_enabled,
        }))
    }
}

/// Decodes a client's handshake request on the accepting side.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeRequestDecoder;

impl Decoder for HandshakeRequestDecoder {
    type Item = HandshakeRequest;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let mut peek = Peek::new(src);
        let Some(mode_code) = peek.u8() else {
            return Ok(None);
        };
        let mode = CommunicationMode::from_code(mode_code)?;

        let parsed = (|| {
            let first = peek.u8()?;
            let version_ordinal = if first == TOKEN_ORDINAL {
                let b = peek.take(2)?;
                i16::from_be_bytes([b[0], b[1]])
            } else {
                first as i16
            };
            let reply_ok = peek.u8()?;
            let read_timeout_ms = if mode.is_notification() { 0 } else { peek.i32()? };
            let member_id = peek.byte_array()?.to_vec();
            let conflation = peek.u8()?;
            let _credentials = peek.u8()?;
            Some((version_ordinal, reply_ok, read_timeout_ms, member_id, conflation))
        })();

        let Some((version_ordinal, reply_ok, read_timeout_ms, member_id, conflation)) = parsed
        else {
            return Ok(None);
        };
        if reply_ok != REPLY_OK {
            return Err(GeodeError::Protocol(format!(
                "handshake request carries {} instead of REPLY_OK",
                reply_ok
            )));
        }
        let consumed = peek.pos;
        src.advance(consumed);

        Ok(Some(HandshakeRequest {
            mode,
            version_ordinal,
            read_timeout_ms,
            member_id,
            conflation,
        }))
    }
}
