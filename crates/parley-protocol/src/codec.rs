//! Server-Sent-Events codec for Parley frames.
//!
//! Each frame is one SSE unit: `data: <json>\n\n`. Heartbeats carry the
//! empty object, `data: {}\n\n`.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use thiserror::Error;

use crate::events::{Event, Frame};

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Field prefix of an SSE data line.
const DATA_PREFIX: &[u8] = b"data: ";

/// Terminator of an SSE unit.
const UNIT_TERMINATOR: &[u8] = b"\n\n";

/// Encoded heartbeat unit.
pub const KEEP_ALIVE: &[u8] = b"data: {}\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Buffer does not yet hold a terminated unit.
    #[error("Incomplete frame")]
    Incomplete,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    match frame {
        Frame::KeepAlive => buf.extend_from_slice(KEEP_ALIVE),
        Frame::Event(event) => {
            // serde_json escapes control characters, so the payload never
            // contains a raw newline that would split the unit.
            let payload = serde_json::to_vec(event.as_ref())?;
            if payload.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(payload.len()));
            }

            buf.reserve(DATA_PREFIX.len() + payload.len() + UNIT_TERMINATOR.len());
            buf.put_slice(DATA_PREFIX);
            buf.put_slice(&payload);
            buf.put_slice(UNIT_TERMINATOR);
        }
    }
    Ok(())
}

/// Decode exactly one unit.
///
/// # Errors
///
/// Returns [`ProtocolError::Incomplete`] if the unit is not terminated, or an
/// error if its payload is invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let end = find_terminator(data).ok_or(ProtocolError::Incomplete)?;
    parse_unit(&data[..end])
}

/// Try to decode a unit from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete unit was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the pending unit is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(end) = find_terminator(buf) else {
        if buf.len() > MAX_FRAME_SIZE + DATA_PREFIX.len() {
            return Err(ProtocolError::FrameTooLarge(buf.len()));
        }
        return Ok(None);
    };

    let unit = buf.split_to(end + UNIT_TERMINATOR.len());
    parse_unit(&unit[..end]).map(Some)
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(UNIT_TERMINATOR.len())
        .position(|w| w == UNIT_TERMINATOR)
}

/// Parse the lines of one unit. Multiple `data:` lines are joined with `\n`;
/// comment lines (leading `:`) and other fields are ignored.
fn parse_unit(unit: &[u8]) -> Result<Frame, ProtocolError> {
    let text = std::str::from_utf8(unit).map_err(|e| ProtocolError::Invalid(e.to_string()))?;

    let mut data: Option<String> = None;
    for line in text.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(d) => {
                d.push('\n');
                d.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    let data = data.ok_or_else(|| ProtocolError::Invalid("unit has no data field".into()))?;
    let value: serde_json::Value = serde_json::from_str(&data)?;
    if value.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(Frame::KeepAlive);
    }

    let event: Event = serde_json::from_value(value)?;
    Ok(Frame::Event(Arc::new(event)))
}

/// Codec for streaming frame encoding/decoding.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a frame to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        encode(frame)
    }

    /// Feed received bytes into the codec.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next buffered unit, if one is complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is invalid.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        decode_from(&mut self.buffer)
    }

    /// Number of bytes still buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Profile;
    use crate::events::{ChatMessage, PresenceStanza};

    fn message_frame(text: &str) -> Frame {
        let sender = Profile::new(1, "Alice");
        Frame::event(Event::message(ChatMessage::new(
            "thread",
            sender.clone(),
            vec![sender],
            text,
        )))
    }

    #[test]
    fn test_keep_alive_encoding() {
        let encoded = encode(&Frame::KeepAlive).unwrap();
        assert_eq!(&encoded[..], b"data: {}\n\n");
        assert!(decode(&encoded).unwrap().is_keep_alive());
    }

    #[test]
    fn test_event_unit_framing() {
        let encoded = encode(&message_frame("Send Message")).unwrap();
        assert!(encoded.starts_with(b"data: {"));
        assert!(encoded.ends_with(b"}\n\n"));

        let json = &encoded[DATA_PREFIX.len()..encoded.len() - UNIT_TERMINATOR.len()];
        let value: serde_json::Value = serde_json::from_slice(json).unwrap();
        assert_eq!(value["message"]["text"], "Send Message");
    }

    #[test]
    fn test_newlines_stay_inside_one_unit() {
        let encoded = encode(&message_frame("line one\n\nline two")).unwrap();
        assert_eq!(find_terminator(&encoded), Some(encoded.len() - 2));

        let Frame::Event(event) = decode(&encoded).unwrap() else {
            panic!("expected an event");
        };
        assert_eq!(event.as_message().unwrap().text, "line one\n\nline two");
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&message_frame("hi")).unwrap();
        assert!(matches!(
            decode(&encoded[..encoded.len() - 1]),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let presence = Frame::event(Event::presence(PresenceStanza::new(
            Profile::new("bob", "Bob"),
            true,
        )));

        let mut buf = BytesMut::new();
        encode_into(&presence, &mut buf).unwrap();
        encode_into(&Frame::KeepAlive, &mut buf).unwrap();
        buf.extend_from_slice(b"data: {\"tim");

        assert_eq!(decode_from(&mut buf).unwrap(), Some(presence));
        assert!(decode_from(&mut buf).unwrap().unwrap().is_keep_alive());
        assert_eq!(decode_from(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"data: {\"tim");
    }

    #[test]
    fn test_comments_and_multiline_data() {
        let unit = b": comment\ndata: {\ndata: }\n\n";
        assert!(decode(unit).unwrap().is_keep_alive());
    }

    #[test]
    fn test_unit_without_data() {
        assert!(matches!(
            decode(b"event: ping\n\n"),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn test_frame_codec_buffers_partial_input() {
        let encoded = encode(&message_frame("chunked")).unwrap();
        let (head, tail) = encoded.split_at(10);

        let mut codec = FrameCodec::new();
        codec.extend(head);
        assert!(codec.next_frame().unwrap().is_none());
        codec.extend(tail);
        assert!(matches!(codec.next_frame().unwrap(), Some(Frame::Event(_))));
        assert_eq!(codec.buffered(), 0);
    }
}
