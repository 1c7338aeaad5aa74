//! Line framing for the gateway byte stream.
//!
//! The gateway terminates every packet with CRLF. Reads from the transport
//! arrive in arbitrary chunks, so bytes are accumulated until a complete
//! line is available. Each extracted line is checked against the packet
//! grammar before it is handed on.

use bytes::BytesMut;

use crate::error::{PacketError, PacketResult};
use crate::grammar::is_valid_packet;

/// Packet terminator.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Maximum undelimited data kept in the buffer. Anything longer without a
/// terminator is noise.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Accumulates received bytes and splits them into packet lines.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: BytesMut,
}

impl PacketFramer {
    pub fn new() -> Self {
        PacketFramer {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_LINE_LENGTH && self.find_terminator().is_none() {
            log::warn!(
                "discarding {} bytes of undelimited data",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    fn find_terminator(&self) -> Option<usize> {
        self.buffer
            .windows(LINE_TERMINATOR.len())
            .position(|w| w == LINE_TERMINATOR)
    }

    /// Take the next complete line from the buffer.
    ///
    /// Returns `None` if more data is needed, `Some(Err(_))` for a line that
    /// fails the packet grammar. Undecodable bytes are replaced rather than
    /// rejected.
    pub fn decode(&mut self) -> Option<PacketResult<String>> {
        let end = self.find_terminator()?;
        let line_data = self.buffer.split_to(end);
        let _ = self.buffer.split_to(LINE_TERMINATOR.len());

        let line = String::from_utf8_lossy(&line_data).into_owned();
        if is_valid_packet(&line) {
            Some(Ok(line))
        } else {
            Some(Err(PacketError::InvalidPacket(line)))
        }
    }

    /// Take the next valid line, dropping invalid ones with a warning.
    pub fn next_packet(&mut self) -> Option<String> {
        loop {
            match self.decode()? {
                Ok(line) => return Some(line),
                Err(err) => log::warn!("dropping {}", err),
            }
        }
    }

    /// Encode a packet for transmission, appending the terminator.
    pub fn encode_packet(packet: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(packet.len() + LINE_TERMINATOR.len());
        buf.extend_from_slice(packet.as_bytes());
        buf.extend_from_slice(LINE_TERMINATOR);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
