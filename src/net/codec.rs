use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::api::message::Message;

/// Upper bound for one line; a full job inventory of a large subtree fits comfortably.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Combines LinesCodec (newline framing) with serde_json (serialization).
///
/// Lines that are not a valid [`Message`] are logged and skipped, the stream carries on.
pub struct MessageCodec {
    codec: LinesCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self { codec: LinesCodec::new_with_max_length(MAX_LINE_LENGTH) }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_io_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::new(io::ErrorKind::InvalidData, "message line too long"),
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_string(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.codec.encode(line, dst).map_err(to_io_error)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.codec.decode(src).map_err(to_io_error)? {
                Some(line) => match parse_line(&line) {
                    Some(message) => return Ok(Some(message)),
                    None => continue,
                },
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.codec.decode_eof(src).map_err(to_io_error)? {
                Some(line) => match parse_line(&line) {
                    Some(message) => return Ok(Some(message)),
                    None => continue,
                },
                None => return Ok(None),
            }
        }
    }
}

fn parse_line(line: &str) -> Option<Message> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(message) => Some(message),
        Err(e) => {
            log::warn!("Skipping malformed message line ({}): {}", e, line);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_one_json_object_per_line() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Message::KillNodes, &mut buf).unwrap();

        assert_eq!(&buf[..], b"{\"type\":\"kill_nodes\"}\n");
    }

    #[test]
    fn skips_garbage_until_a_valid_message() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from("\nnot json\n{\"type\":\"unknown\"}\n{\"type\":\"spin_up_nodes\",\"node_count\":2}\n");

        let message = codec.decode(&mut buf).unwrap();

        assert!(matches!(message, Some(Message::SpinUpNodes { node_count: 2 })));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn waits_for_a_complete_line() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from("{\"type\":\"kill_");

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"nodes\"}\n");
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Message::KillNodes)));
    }
}
