//! Wire frames exchanged with the optimization process.
//!
//! Every message is a multipart ZMQ message whose parts are UTF-8 strings:
//!
//! ```text
//! reply endpoint:      ["HELLO", client-id, "1"]   -> echoed verbatim
//!                      ["GOODBYE", client-id]      -> echoed verbatim
//! subscribe endpoint:  ["MESSAGE", client-id, payload]
//! ```

use crate::error::{Result, StreamError};
use std::fmt;

/// Protocol version this server speaks.
pub const PROTOCOL_VERSION: &str = "1";

/// One decoded protocol message.
pub type Frame = Vec<String>;

/// Message kind carried in the first field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Goodbye,
    Message,
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::Goodbye => "GOODBYE",
            MessageKind::Message => "MESSAGE",
        }
    }

    /// Number of fields a well-formed frame of this kind has.
    pub fn arity(&self) -> usize {
        match self {
            MessageKind::Hello | MessageKind::Message => 3,
            MessageKind::Goodbye => 2,
        }
    }

    /// Parse a wire name. Matching is exact.
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "HELLO" => Some(MessageKind::Hello),
            "GOODBYE" => Some(MessageKind::Goodbye),
            "MESSAGE" => Some(MessageKind::Message),
            _ => None,
        }
    }

    /// Check that `frame` is a well-formed message of this kind.
    pub fn matches(&self, frame: &[String]) -> bool {
        frame.len() == self.arity()
            && frame.first().and_then(|f| MessageKind::parse(f)) == Some(*self)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode raw multipart parts into a frame, field by field.
pub fn decode_frame(parts: Vec<Vec<u8>>) -> Result<Frame> {
    parts
        .into_iter()
        .enumerate()
        .map(|(index, part)| {
            String::from_utf8(part).map_err(|e| StreamError::Decode {
                index,
                source: e.utf8_error(),
            })
        })
        .collect()
}

/// Encode a frame into multipart parts.
pub fn encode_frame(frame: &[String]) -> Vec<Vec<u8>> {
    frame.iter().map(|field| field.as_bytes().to_vec()).collect()
}

/// `["HELLO", client_id, PROTOCOL_VERSION]`
pub fn hello_frame(client_id: &str) -> Frame {
    vec![
        MessageKind::Hello.to_string(),
        client_id.to_string(),
        PROTOCOL_VERSION.to_string(),
    ]
}

/// `["GOODBYE", client_id]`
pub fn goodbye_frame(client_id: &str) -> Frame {
    vec![MessageKind::Goodbye.to_string(), client_id.to_string()]
}

/// `["MESSAGE", client_id, payload]`
///
/// Fails if the payload is not UTF-8, since every field must decode as a string.
pub fn message_frame(client_id: &str, payload: &[u8]) -> Result<Frame> {
    let payload = std::str::from_utf8(payload)
        .map_err(|source| StreamError::Decode { index: 2, source })?;
    Ok(vec![
        MessageKind::Message.to_string(),
        client_id.to_string(),
        payload.to_string(),
    ])
}
