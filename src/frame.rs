//! Wire codec for the two frames the chat relay exchanges: the stream-channel
//! admission frame (room create/join) and the datagram-channel chat frame.
//!
//! Both frames are length-prefixed and self-delimiting within a single TCP
//! receive or a single UDP datagram; neither frame needs a separate framing
//! layer on top of "one read = one frame".

use std::fmt;

/// A decode failure for either frame. Never fatal to the process: the
/// admission service closes the connection, the relay service drops the
/// datagram (or replies `Unauthorized`, depending on the call site).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame shorter than its length fields imply")]
    TooShort,
    #[error("room name must be 1..=255 bytes, got {0}")]
    InvalidRoomNameLength(usize),
    #[error("unknown operation code {0}")]
    UnknownOperation(u8),
    #[error("room name is not valid UTF-8")]
    InvalidUtf8,
}

/// The two admission operations. A closed sum type: any other wire byte is a
/// `ProtocolError::UnknownOperation`, never a silently-accepted third state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOperation {
    Create,
    Join,
}

impl AdmissionOperation {
    fn to_byte(self) -> u8 {
        match self {
            AdmissionOperation::Create => 1,
            AdmissionOperation::Join => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(AdmissionOperation::Create),
            2 => Ok(AdmissionOperation::Join),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }
}

/// A decoded admission frame: `room_name_len | operation | state(reserved) | room_name`.
///
/// `state` is always sent as 0 and ignored on receive, so it is not carried
/// in the decoded value — re-encoding always emits the reserved byte as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionFrame {
    pub operation: AdmissionOperation,
    pub room_name: String,
}

impl AdmissionFrame {
    pub fn new(operation: AdmissionOperation, room_name: impl Into<String>) -> Self {
        AdmissionFrame {
            operation,
            room_name: room_name.into(),
        }
    }

    /// Decodes one admission frame from exactly the bytes of a single TCP
    /// read. The caller is responsible for reading `3 + room_name_len` bytes
    /// total (the room name length is the first byte); this function only
    /// validates what it is given.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 3 {
            return Err(ProtocolError::TooShort);
        }
        let room_name_len = bytes[0] as usize;
        if room_name_len == 0 {
            return Err(ProtocolError::InvalidRoomNameLength(0));
        }
        let operation = AdmissionOperation::from_byte(bytes[1])?;
        // bytes[2] is the reserved state byte, ignored on receive.
        let room_name_bytes = bytes.get(3..3 + room_name_len).ok_or(ProtocolError::TooShort)?;
        if bytes.len() != 3 + room_name_len {
            return Err(ProtocolError::TooShort);
        }
        let room_name =
            String::from_utf8(room_name_bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(AdmissionFrame { operation, room_name })
    }

    pub fn encode(&self) -> Vec<u8> {
        let room_name_bytes = self.room_name.as_bytes();
        let mut out = Vec::with_capacity(3 + room_name_bytes.len());
        out.push(room_name_bytes.len() as u8);
        out.push(self.operation.to_byte());
        out.push(0); // reserved state byte
        out.extend_from_slice(room_name_bytes);
        out
    }
}

/// The four accepted admission replies. Each renders to the exact ASCII
/// string the wire protocol expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionReply {
    RoomCreated(Vec<u8>),
    JoinedRoom(Vec<u8>),
    RoomAlreadyExists,
    RoomNotFound,
}

impl fmt::Display for AdmissionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionReply::RoomCreated(token) => {
                write!(f, "Room created {}", String::from_utf8_lossy(token))
            }
            AdmissionReply::JoinedRoom(token) => {
                write!(f, "Joined room {}", String::from_utf8_lossy(token))
            }
            AdmissionReply::RoomAlreadyExists => write!(f, "Room already exists"),
            AdmissionReply::RoomNotFound => write!(f, "Room not found"),
        }
    }
}

impl AdmissionReply {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Client-side: recognizes success by the `"Room created"` / `"Joined
    /// room"` prefix and extracts the token as the final whitespace-delimited
    /// field. Returns `None` on any other reply.
    pub fn parse_token(reply: &str) -> Option<&str> {
        if reply.starts_with("Room created") || reply.starts_with("Joined room") {
            reply.split_whitespace().last()
        } else {
            None
        }
    }
}

/// A decoded chat frame: `room_name_len | token_len | room_name | token | message`.
///
/// The relay sends the same frame back out with `token` set to the
/// *sender's* token, never the recipient's — that is how recipients learn
/// who spoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFrame {
    pub room_name: String,
    pub token: Vec<u8>,
    pub message: String,
}

impl ChatFrame {
    pub fn new(room_name: impl Into<String>, token: impl Into<Vec<u8>>, message: impl Into<String>) -> Self {
        ChatFrame {
            room_name: room_name.into(),
            token: token.into(),
            message: message.into(),
        }
    }

    /// Decodes one chat frame from exactly the bytes of a single UDP
    /// datagram. A datagram shorter than `2 + room_name_len + token_len` is
    /// malformed; the message may be zero length (the remainder of the
    /// datagram after the header).
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 2 {
            return Err(ProtocolError::TooShort);
        }
        let room_name_len = bytes[0] as usize;
        let token_len = bytes[1] as usize;
        let header_len = 2 + room_name_len + token_len;
        if bytes.len() < header_len {
            return Err(ProtocolError::TooShort);
        }
        let room_name_bytes = &bytes[2..2 + room_name_len];
        let token = bytes[2 + room_name_len..header_len].to_vec();
        let message_bytes = &bytes[header_len..];
        let room_name =
            String::from_utf8(room_name_bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        let message =
            String::from_utf8(message_bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(ChatFrame { room_name, token, message })
    }

    pub fn encode(&self) -> Vec<u8> {
        let room_name_bytes = self.room_name.as_bytes();
        let message_bytes = self.message.as_bytes();
        let mut out = Vec::with_capacity(2 + room_name_bytes.len() + self.token.len() + message_bytes.len());
        out.push(room_name_bytes.len() as u8);
        out.push(self.token.len() as u8);
        out.extend_from_slice(room_name_bytes);
        out.extend_from_slice(&self.token);
        out.extend_from_slice(message_bytes);
        out
    }
}

/// Fixed error reply the relay sends to `src` on an authentication failure
/// (unknown token, or a token presented for a room that does not exist).
/// Parse failures are dropped with no reply.
pub const UNAUTHORIZED_REPLY: &[u8] = b"Unauthorized";

/// Maximum admission frame size the service will read before giving up, per
/// spec.md's "bounded total size (reject > some limit, e.g. 4 KiB)".
pub const MAX_ADMISSION_FRAME_SIZE: usize = 4096;

/// Maximum datagram size the relay accepts; spec.md requires at least 4096.
pub const MAX_DATAGRAM_SIZE: usize = 4096;
