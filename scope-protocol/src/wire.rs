//! Length prefixed envelope used on the relay control connection.
//!
//! ```text
//! ┌────────────────────┬─────────────┬──────────────────────┐
//! │ length (u16, BE)   │ command u8  │ data (length - 3)    │
//! └────────────────────┴─────────────┴──────────────────────┘
//! ```
//! `length` counts the whole message including its own two bytes.
use std::io::{self, Write};

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Bytes preceding the data of every message.
pub const WIRE_HEADER_LEN: usize = 3;

/// Default upper bound for a declared message length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024;

/// Width of the reply to [`Command::Serial`]. Shorter serials are padded
/// with NUL bytes, longer ones are truncated.
pub const SERIAL_LEN: usize = 8;

/// Renders the fixed width reply to [`Command::Serial`].
pub fn serial_reply(serial: &str) -> [u8; SERIAL_LEN] {
    let mut reply = [0u8; SERIAL_LEN];
    let bytes = serial.as_bytes();
    let n = bytes.len().min(SERIAL_LEN);
    reply[..n].copy_from_slice(&bytes[..n]);
    reply
}

/// Reads back a [`serial_reply`], dropping the padding.
pub fn parse_serial(reply: &[u8]) -> String {
    let end = reply.iter().position(|&b| b == 0).unwrap_or(reply.len());
    String::from_utf8_lossy(&reply[..end]).into_owned()
}

/// Commands understood by the relay server.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Forward a header and payload verbatim to the command endpoint.
    Send = 10,
    /// Read a probe response. Data: `[length]`.
    Read = 11,
    /// Read acquisition data. Data: `[length_hi, length_lo]`.
    ReadHbw = 12,
    /// Request the serial number of the device.
    Serial = 13,
    /// Discard buffered acquisition data.
    Flush = 14,
    /// End the session.
    Disconnect = 15,
    /// Open a data link back to the client. Data: `[port_hi, port_lo]`.
    StartDataLink = 16,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            10 => Command::Send,
            11 => Command::Read,
            12 => Command::ReadHbw,
            13 => Command::Serial,
            14 => Command::Flush,
            15 => Command::Disconnect,
            16 => Command::StartDataLink,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

/// A single message on the control connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireMessage {
    pub command: Command,
    pub data: Vec<u8>,
}

impl WireMessage {
    pub fn new(command: Command, data: impl Into<Vec<u8>>) -> WireMessage {
        WireMessage {
            command,
            data: data.into(),
        }
    }

    pub fn read(length: u8) -> WireMessage {
        WireMessage::new(Command::Read, [length])
    }

    pub fn read_hbw(length: u16) -> WireMessage {
        WireMessage::new(Command::ReadHbw, length.to_be_bytes())
    }

    pub fn start_data_link(port: u16) -> WireMessage {
        WireMessage::new(Command::StartDataLink, port.to_be_bytes())
    }

    /// Total encoded size including the length prefix.
    pub fn encoded_len(&self) -> usize {
        WIRE_HEADER_LEN + self.data.len()
    }

    /// Serializes the message into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let length = u16::try_from(self.encoded_len()).map_err(|_| {
            ProtocolError::FrameTooLarge {
                max: u16::MAX as usize,
                got: self.encoded_len(),
            }
        })?;
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.command as u8);
        out.extend_from_slice(&self.data);
        Ok(())
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let encoded = self
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        writer.write_all(&encoded)
    }

    /// Takes one complete message off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the message is incomplete.
    pub fn decode(
        buf: &mut BytesMut,
        max_frame_size: usize,
    ) -> Result<Option<WireMessage>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if length < WIRE_HEADER_LEN {
            return Err(ProtocolError::InvalidLength(length));
        }
        if length > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                max: max_frame_size,
                got: length,
            });
        }
        if buf.len() < length {
            return Ok(None);
        }
        let mut frame = buf.split_to(length);
        frame.advance(2);
        let command = Command::try_from(frame.get_u8())?;
        Ok(Some(WireMessage {
            command,
            data: frame.to_vec(),
        }))
    }

    /// First data byte as a length, as carried by [`Command::Read`].
    pub fn u8_arg(&self) -> Result<u8, ProtocolError> {
        self.data.first().copied().ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("{:?} without argument", self.command))
        })
    }

    /// First two data bytes as a big-endian value, as carried by
    /// [`Command::ReadHbw`] and [`Command::StartDataLink`].
    pub fn u16_arg(&self) -> Result<u16, ProtocolError> {
        match self.data.get(..2) {
            Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
            None => Err(ProtocolError::MalformedFrame(format!(
                "{:?} needs two argument bytes, got {}",
                self.command,
                self.data.len()
            ))),
        }
    }
}

/// Reassembles messages from an arbitrarily fragmented byte stream.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameBuffer {
    pub fn new(max_frame_size: usize) -> FrameBuffer {
        FrameBuffer {
            buf: BytesMut::with_capacity(max_frame_size),
            max_frame_size,
        }
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, received: &[u8]) {
        self.buf.extend_from_slice(received);
    }

    /// Removes the next complete message, if any.
    pub fn next_message(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        WireMessage::decode(&mut self.buf, self.max_frame_size)
    }

    /// Bytes of an incomplete trailing message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        FrameBuffer::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> WireMessage {
        WireMessage::new(Command::Send, vec![0xC0, 10, 5, 0x18, 0x05, 1, 2, 3])
    }

    #[test]
    fn encode_layout() {
        let bytes = WireMessage::read(12).encode().unwrap();
        assert_eq!(bytes, [0, 4, 11, 12]);
        let bytes = WireMessage::read_hbw(0x0102).encode().unwrap();
        assert_eq!(bytes, [0, 5, 12, 1, 2]);
    }

    #[test]
    fn byte_at_a_time_yields_one_message() {
        let encoded = sample().encode().unwrap();
        let mut buffer = FrameBuffer::default();
        let mut parsed = Vec::new();
        for byte in &encoded {
            buffer.extend(std::slice::from_ref(byte));
            while let Some(msg) = buffer.next_message().unwrap() {
                parsed.push(msg);
            }
        }
        assert_eq!(parsed, [sample()]);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(parsed[0].encode().unwrap(), encoded);
    }

    #[test]
    fn uneven_fragments_yield_one_message() {
        let encoded = sample().encode().unwrap();
        for split in 0..encoded.len() {
            let mut buffer = FrameBuffer::default();
            buffer.extend(&encoded[..split]);
            assert_eq!(buffer.next_message().unwrap(), None);
            buffer.extend(&encoded[split..]);
            assert_eq!(buffer.next_message().unwrap(), Some(sample()));
            assert_eq!(buffer.next_message().unwrap(), None);
        }
    }

    #[test]
    fn two_messages_in_one_read() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend(WireMessage::new(Command::Flush, []).encode().unwrap());
        let mut buffer = FrameBuffer::default();
        buffer.extend(&bytes);
        assert_eq!(buffer.next_message().unwrap(), Some(sample()));
        assert_eq!(
            buffer.next_message().unwrap(),
            Some(WireMessage::new(Command::Flush, []))
        );
        assert_eq!(buffer.next_message().unwrap(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn trailing_partial_message_is_kept() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend_from_slice(&[0, 4, 11]);
        let mut buffer = FrameBuffer::default();
        buffer.extend(&bytes);
        assert_eq!(buffer.next_message().unwrap(), Some(sample()));
        assert_eq!(buffer.next_message().unwrap(), None);
        assert_eq!(buffer.pending(), 3);
        buffer.extend(&[16]);
        assert_eq!(buffer.next_message().unwrap(), Some(WireMessage::read(16)));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buffer = FrameBuffer::new(64);
        buffer.extend(&[0, 65, 10]);
        assert_eq!(
            buffer.next_message(),
            Err(ProtocolError::FrameTooLarge { max: 64, got: 65 })
        );
    }

    #[test]
    fn undersized_length_is_rejected() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(&[0, 2, 10]);
        assert_eq!(buffer.next_message(), Err(ProtocolError::InvalidLength(2)));
    }

    #[test]
    fn unknown_command() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(&[0, 3, 99]);
        assert_eq!(buffer.next_message(), Err(ProtocolError::UnknownCommand(99)));
    }

    #[test]
    fn serial_reply_is_fixed_width() {
        assert_eq!(serial_reply("MOCK0001"), *b"MOCK0001");
        assert_eq!(serial_reply("SN42"), *b"SN42\0\0\0\0");
        assert_eq!(serial_reply("SCOPE-123456"), *b"SCOPE-12");
        assert_eq!(parse_serial(&serial_reply("SN42")), "SN42");
        assert_eq!(parse_serial(b"MOCK0001"), "MOCK0001");
    }

    #[test]
    fn arguments() {
        assert_eq!(WireMessage::read(7).u8_arg().unwrap(), 7);
        assert_eq!(WireMessage::start_data_link(0x1F90).u16_arg().unwrap(), 0x1F90);
        assert!(WireMessage::new(Command::ReadHbw, [1]).u16_arg().is_err());
        assert!(WireMessage::new(Command::Read, []).u8_arg().is_err());
    }
}
