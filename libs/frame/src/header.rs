//! Frame header, command codes and the UPD payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the version field.
pub const SIZE_OF_VERSION: usize = 1;

/// Size of the command field.
pub const SIZE_OF_COMMAND: usize = 1;

/// Size of the payload length field.
pub const SIZE_OF_LENGTH: usize = 2;

/// Size of the stream identifier field.
pub const SIZE_OF_STREAM_ID: usize = 4;

/// Encoded size of a frame header (8 bytes).
pub const HEADER_SIZE: usize = SIZE_OF_VERSION + SIZE_OF_COMMAND + SIZE_OF_LENGTH + SIZE_OF_STREAM_ID;

/// Encoded size of the UPD command payload (8 bytes).
pub const UPD_PAYLOAD_SIZE: usize = 8;

/// Initial peer window guess used by version 2 peers before the first UPD.
pub const INITIAL_PEER_WINDOW: u32 = 262_144;

/// Protocol versions a tunnel peer may announce.
pub const SUPPORTED_VERSIONS: [u8; 2] = [1, 2];

/// Returns true if `version` is a recognized protocol version.
pub fn is_supported_version(version: u8) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Command code carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Stream open.
    Syn = 0,
    /// Stream close.
    Fin = 1,
    /// Data push.
    Psh = 2,
    /// No operation (keepalive).
    Nop = 3,
    /// Bytes-consumed and window notification.
    Upd = 4,
}

impl Command {
    /// All commands in wire order.
    pub const ALL: [Command; 5] = [
        Command::Syn,
        Command::Fin,
        Command::Psh,
        Command::Nop,
        Command::Upd,
    ];

    /// Wire value of this command.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Protocol version that introduced this command.
    pub fn introduced_in(self) -> u8 {
        match self {
            Command::Upd => 2,
            _ => 1,
        }
    }

    /// Short uppercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Syn => "SYN",
            Command::Fin => "FIN",
            Command::Psh => "PSH",
            Command::Nop => "NOP",
            Command::Upd => "UPD",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Syn),
            1 => Ok(Command::Fin),
            2 => Ok(Command::Psh),
            3 => Ok(Command::Nop),
            4 => Ok(Command::Upd),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed 8-byte frame header.
///
/// The command is kept as a raw byte: decoding never fails, and callers that
/// need a structured command go through [`FrameHeader::command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Protocol version.
    pub version: u8,
    /// Raw command byte.
    pub cmd: u8,
    /// Payload length in bytes.
    pub length: u16,
    /// Stream identifier.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Create a header from its fields.
    pub fn new(version: u8, cmd: Command, stream_id: u32, length: u16) -> Self {
        Self {
            version,
            cmd: cmd.as_u8(),
            length,
            stream_id,
        }
    }

    /// Encode the header into its wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.cmd;
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_le_bytes());
        buf
    }

    /// Decode a header from exactly 8 bytes.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            version: buf[0],
            cmd: buf[1],
            length: u16::from_le_bytes([buf[2], buf[3]]),
            stream_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Decode a header from the first 8 bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self, FrameError> {
        let buf: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(FrameError::ShortBuffer {
                needed: HEADER_SIZE,
                actual: data.len(),
            })?;
        Ok(Self::decode(buf))
    }

    /// Structured view of the command byte.
    pub fn command(&self) -> Result<Command, FrameError> {
        Command::try_from(self.cmd)
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version:{} Cmd:{} StreamID:{} Length:{}",
            self.version, self.cmd, self.stream_id, self.length
        )
    }
}

/// Payload of an UPD frame: `| consumed (4B, LE) | window (4B, LE) |`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdPayload {
    /// Bytes consumed by the remote peer (acknowledgement).
    pub consumed: u32,
    /// Advertised receive window.
    pub window: u32,
}

impl UpdPayload {
    /// Create a new UPD payload.
    pub fn new(consumed: u32, window: u32) -> Self {
        Self { consumed, window }
    }

    /// Encode into wire representation.
    pub fn encode(&self) -> [u8; UPD_PAYLOAD_SIZE] {
        let mut buf = [0u8; UPD_PAYLOAD_SIZE];
        buf[..4].copy_from_slice(&self.consumed.to_le_bytes());
        buf[4..].copy_from_slice(&self.window.to_le_bytes());
        buf
    }

    /// Decode from exactly 8 bytes.
    pub fn decode(buf: &[u8; UPD_PAYLOAD_SIZE]) -> Self {
        Self {
            consumed: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            window: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Decode from the first 8 bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self, FrameError> {
        let buf: &[u8; UPD_PAYLOAD_SIZE] = data
            .get(..UPD_PAYLOAD_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(FrameError::ShortBuffer {
                needed: UPD_PAYLOAD_SIZE,
                actual: data.len(),
            })?;
        Ok(Self::decode(buf))
    }
}

/// A whole frame: header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub cmd: Command,
    pub stream_id: u32,
    pub data: Bytes,
}

impl Frame {
    /// Create a frame with an empty payload.
    pub fn new(version: u8, cmd: Command, stream_id: u32) -> Self {
        Self {
            version,
            cmd,
            stream_id,
            data: Bytes::new(),
        }
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Header describing this frame.
    pub fn header(&self) -> Result<FrameHeader, FrameError> {
        let length = u16::try_from(self.data.len())
            .map_err(|_| FrameError::PayloadTooLarge(self.data.len()))?;
        Ok(FrameHeader::new(self.version, self.cmd, self.stream_id, length))
    }

    /// Encode header followed by payload.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_slice(&header.encode());
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 8);
        assert_eq!(UPD_PAYLOAD_SIZE, 8);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = FrameHeader::new(2, Command::Psh, 0x0403_0201, 0x0605);
        assert_eq!(
            header.encode(),
            [0x02, 0x02, 0x05, 0x06, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn test_decode_keeps_unknown_command() {
        let header = FrameHeader::decode(&[1, 9, 0, 0, 0, 0, 0, 0]);
        assert_eq!(header.cmd, 9);
        assert_eq!(header.command(), Err(FrameError::UnknownCommand(9)));
    }

    #[test]
    fn test_from_slice_short_buffer() {
        let err = FrameHeader::from_slice(&[1, 2, 3]).unwrap_err();
        assert!(err.is_short_buffer());
        assert_eq!(
            err,
            FrameError::ShortBuffer {
                needed: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn test_from_slice_ignores_trailing_bytes() {
        let mut data = FrameHeader::new(1, Command::Syn, 7, 3).encode().to_vec();
        data.extend_from_slice(b"abc");
        let header = FrameHeader::from_slice(&data).unwrap();
        assert_eq!(header.stream_id, 7);
        assert_eq!(header.length, 3);
    }

    #[test]
    fn test_header_display() {
        let header = FrameHeader::new(1, Command::Nop, 42, 0);
        assert_eq!(header.to_string(), "Version:1 Cmd:3 StreamID:42 Length:0");
    }

    #[test]
    fn test_command_try_from() {
        for cmd in Command::ALL {
            assert_eq!(Command::try_from(cmd.as_u8()), Ok(cmd));
        }
        assert!(Command::try_from(5).is_err());
        assert!(Command::try_from(255).is_err());
    }

    #[test]
    fn test_command_introduced_in() {
        assert_eq!(Command::Syn.introduced_in(), 1);
        assert_eq!(Command::Nop.introduced_in(), 1);
        assert_eq!(Command::Upd.introduced_in(), 2);
    }

    #[test]
    fn test_supported_versions() {
        assert!(is_supported_version(1));
        assert!(is_supported_version(2));
        assert!(!is_supported_version(0));
        assert!(!is_supported_version(3));
    }

    #[test]
    fn test_upd_payload_layout() {
        let upd = UpdPayload::new(1, INITIAL_PEER_WINDOW);
        assert_eq!(upd.encode(), [1, 0, 0, 0, 0x00, 0x00, 0x04, 0x00]);
        assert!(UpdPayload::from_slice(&[0; 4]).unwrap_err().is_short_buffer());
    }

    #[test]
    fn test_frame_encode() {
        let frame = Frame::new(1, Command::Psh, 3).with_data(&b"hello"[..]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE + 5);

        let header = FrameHeader::from_slice(&encoded).unwrap();
        assert_eq!(header.command(), Ok(Command::Psh));
        assert_eq!(header.stream_id, 3);
        assert_eq!(header.length, 5);
        assert_eq!(&encoded[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_frame_payload_too_large() {
        let frame = Frame::new(1, Command::Psh, 1).with_data(vec![0u8; 70_000]);
        assert_eq!(frame.encode(), Err(FrameError::PayloadTooLarge(70_000)));
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(
            version in any::<u8>(),
            cmd in 0u8..=4,
            stream_id in any::<u32>(),
            length in any::<u16>(),
        ) {
            let cmd = Command::try_from(cmd).unwrap();
            let header = FrameHeader::new(version, cmd, stream_id, length);
            let decoded = FrameHeader::decode(&header.encode());
            prop_assert_eq!(decoded, header);
            prop_assert_eq!(decoded.command(), Ok(cmd));
        }

        #[test]
        fn prop_upd_roundtrip(consumed in any::<u32>(), window in any::<u32>()) {
            let upd = UpdPayload::new(consumed, window);
            prop_assert_eq!(UpdPayload::decode(&upd.encode()), upd);
        }
    }
}
