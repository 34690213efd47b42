//! Request and reply messages.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::part::Part;
use crate::error::{GeodeError, Result};

/// A server-side exception carried by an exception part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerException {
    /// Fully qualified exception class name.
    pub class_name: String,
    /// Exception message.
    pub message: String,
}

impl ServerException {
    /// Parses the `"<class name>: <message>"` text of an exception part.
    pub fn parse(text: &str) -> Self {
        match text.split_once(": ") {
            Some((class_name, message)) => Self {
                class_name: class_name.to_string(),
                message: message.to_string(),
            },
            None => Self {
                class_name: text.trim().to_string(),
                message: String::new(),
            },
        }
    }

    /// Renders the exception in exception-part form.
    pub fn to_text(&self) -> String {
        if self.message.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}: {}", self.class_name, self.message)
        }
    }

    /// Maps the exception to a typed error.
    pub fn into_error(self) -> GeodeError {
        GeodeError::from_server_exception(&self.class_name, &self.message)
    }

    /// Builds the two parts servers use to send this exception: an opaque
    /// serialized throwable followed by the textual form.
    pub fn to_parts(&self) -> [Part; 2] {
        let text = self.to_text();
        let mut blob = Vec::with_capacity(text.len() + 1);
        blob.push(crate::serialization::ds_code::JAVA_SERIALIZABLE as u8);
        blob.extend_from_slice(text.as_bytes());
        [Part::object_bytes(blob), Part::string(&text)]
    }
}

/// A non-chunked message: a request sent by the client, a reply from the
/// server, or a server push on a subscription channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: i32,
    transaction_id: i32,
    flags: u8,
    parts: Vec<Part>,
}

impl Message {
    /// Creates an empty message outside any transaction.
    pub fn new(message_type: i32) -> Self {
        Self {
            message_type,
            transaction_id: NO_TRANSACTION,
            flags: 0,
            parts: Vec::new(),
        }
    }

    /// Creates a message from decoded fields.
    pub fn from_parts(message_type: i32, transaction_id: i32, flags: u8, parts: Vec<Part>) -> Self {
        Self {
            message_type,
            transaction_id,
            flags,
            parts,
        }
    }

    /// Builds an exception reply for `exception`.
    pub fn exception(exception: &ServerException) -> Self {
        let [blob, text] = exception.to_parts();
        Self::new(EXCEPTION).with_part(blob).with_part(text)
    }

    /// Appends a part, builder style.
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Sets the transaction id, builder style.
    pub fn with_transaction_id(mut self, transaction_id: i32) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// Sets the header flags, builder style.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Appends a part.
    pub fn push_part(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Sets the transaction id.
    pub fn set_transaction_id(&mut self, transaction_id: i32) {
        self.transaction_id = transaction_id;
    }

    /// Returns the message type.
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    /// Returns the transaction id, or [`NO_TRANSACTION`].
    pub fn transaction_id(&self) -> i32 {
        self.transaction_id
    }

    /// Returns the header flags.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns true if the server asked for a metadata refresh.
    pub fn refresh_metadata_requested(&self) -> bool {
        self.flags & REFRESH_METADATA_FLAG != 0
    }

    /// Returns all parts.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Consumes the message and returns its parts.
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Returns the number of parts.
    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// Returns part `index`, failing with a protocol error if absent.
    pub fn part(&self, index: usize) -> Result<&Part> {
        self.parts.get(index).ok_or_else(|| {
            GeodeError::Protocol(format!(
                "{} message has {} parts, part {} requested",
                message_type_name(self.message_type),
                self.parts.len(),
                index
            ))
        })
    }

    /// Returns the total payload length of all parts.
    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(Part::wire_size).sum()
    }

    /// Returns the encoded size of the message.
    pub fn wire_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload_len()
    }

    /// Writes the header and all parts to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_i32(self.message_type);
        dst.put_i32(self.payload_len() as i32);
        dst.put_i32(self.parts.len() as i32);
        dst.put_i32(self.transaction_id);
        dst.put_u8(self.flags);
        for part in &self.parts {
            part.write_to(dst);
        }
    }

    /// Encodes the message into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Returns the server exception carried by an exception message.
    pub fn server_exception(&self) -> Option<ServerException> {
        if self.message_type != EXCEPTION {
            return None;
        }
        let text = self
            .parts
            .get(1)
            .and_then(|p| p.as_string().ok())
            .unwrap_or_default();
        Some(ServerException::parse(&text))
    }

    /// Converts error replies into errors, passing other messages through.
    ///
    /// `EXCEPTION` replies map through the server exception class; the
    /// operation-specific `*_ERROR` types carry a textual message in part 0.
    pub fn into_result(self) -> Result<Self> {
        if let Some(exception) = self.server_exception() {
            return Err(exception.into_error());
        }
        if is_error_type(self.message_type) {
            let text = self
                .parts
                .first()
                .and_then(|p| p.as_string().ok())
                .unwrap_or_default();
            let err = match self.message_type {
                COMMIT_ERROR => GeodeError::CommitConflict(text),
                _ => {
                    let exception = ServerException::parse(&text);
                    if exception.message.is_empty() && !text.contains('.') {
                        GeodeError::Server {
                            class_name: message_type_name(self.message_type).to_string(),
                            message: text,
                        }
                    } else {
                        exception.into_error()
                    }
                }
            };
            return Err(err);
        }
        Ok(self)
    }
}
