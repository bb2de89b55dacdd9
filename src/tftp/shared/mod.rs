use std::fmt;
use std::fmt::{Display, Formatter};

use byteorder::{ByteOrder, NetworkEndian};
use thiserror::Error;

use crate::tftp::shared::ack_packet::AckPacket;
use crate::tftp::shared::data_packet::DataPacket;
use crate::tftp::shared::err_packet::ErrorPacket;
use crate::tftp::shared::request_packet::*;

pub mod ack_packet;
pub mod data_channel;
pub mod data_packet;
pub mod err_packet;
pub mod handshake;
pub mod request_packet;

const OP_LEN: usize = 2;
/// Smallest valid packet: opcode plus a two byte field (or a one byte
/// filename and its terminator).
pub const MIN_PACKET_LEN: usize = 4;
/// Stride size for reading / writing files.
pub const STRIDE_SIZE: usize = 512;
/// Op code for Read Request
pub const OP_RRQ: u16 = 0x001;
/// Op code for Write Request
pub const OP_WRQ: u16 = 0x002;
/// Op code for Data packet
pub const OP_DATA: u16 = 0x003;
/// Op code for ACK packet
pub const OP_ACK: u16 = 0x004;
/// Op code for Error packet
pub const OP_ERR: u16 = 0x005;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TFTPPacket {
    RRQ(ReadRequestPacket),
    WRQ(WriteRequestPacket),
    ACK(AckPacket),
    ERR(ErrorPacket),
    DATA(DataPacket),
}

impl TFTPPacket {
    pub fn op(&self) -> u16 {
        match self {
            TFTPPacket::RRQ(_) => OP_RRQ,
            TFTPPacket::WRQ(_) => OP_WRQ,
            TFTPPacket::ACK(_) => OP_ACK,
            TFTPPacket::ERR(_) => OP_ERR,
            TFTPPacket::DATA(_) => OP_DATA,
        }
    }
}

impl Display for TFTPPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TFTPPacket::RRQ(p) => write!(f, "RRQ [{}]", p.filename()),
            TFTPPacket::WRQ(p) => write!(f, "WRQ [{}]", p.filename()),
            TFTPPacket::ACK(p) => write!(f, "ACK [{}]", p.blk()),
            TFTPPacket::ERR(p) => write!(f, "ERR [{}]: {}", p.code(), p.err()),
            TFTPPacket::DATA(p) => write!(f, "DATA [{}] ({} bytes)", p.blk(), p.data().len()),
        }
    }
}

impl Serializable for TFTPPacket {
    fn serialize(&self) -> Vec<u8> {
        match self {
            TFTPPacket::RRQ(p) => p.serialize(),
            TFTPPacket::WRQ(p) => p.serialize(),
            TFTPPacket::ACK(p) => p.serialize(),
            TFTPPacket::ERR(p) => p.serialize(),
            TFTPPacket::DATA(p) => p.serialize(),
        }
    }
}

pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
}

pub trait Deserializable {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError>;
}

/// Decodes the valid part of a receive buffer into a packet.
///
/// Never panics: short buffers, unknown opcodes and unterminated strings
/// are all reported as [`TFTPParseError`].
pub fn parse_packet(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
    if buf.len() < MIN_PACKET_LEN {
        return Err(TFTPParseError::new(
            format!("Packet too short! [{} bytes]", buf.len()).as_str(),
        ));
    }

    match NetworkEndian::read_u16(buf) {
        OP_RRQ => ReadRequestPacket::deserialize(buf),
        OP_WRQ => WriteRequestPacket::deserialize(buf),
        OP_ACK => AckPacket::deserialize(buf),
        OP_ERR => ErrorPacket::deserialize(buf),
        OP_DATA => DataPacket::deserialize(buf),
        val => Err(TFTPParseError::new(
            format!("Bad OP code! [{}]", val).as_str(),
        )),
    }
}

/// Returns the bytes between `start` and the first zero byte after it.
pub(crate) fn read_terminated(buf: &[u8], start: usize) -> Result<&[u8], TFTPParseError> {
    let tail = buf.get(start..).unwrap_or_default();
    tail.iter()
        .position(|&byte| byte == 0)
        .map(|end| &tail[..end])
        .ok_or_else(|| TFTPParseError::new("Missing string terminator!"))
}

#[derive(Debug, Error, Eq, PartialEq)]
#[error("Failed to parse packet: {details}")]
pub struct TFTPParseError {
    details: String,
}

impl TFTPParseError {
    pub(crate) fn new(msg: &str) -> TFTPParseError {
        TFTPParseError {
            details: msg.to_string(),
        }
    }

    pub fn details(&self) -> &str {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use crate::tftp::shared::ack_packet::AckPacket;
    use crate::tftp::shared::data_packet::DataPacket;
    use crate::tftp::shared::err_packet::ErrorPacket;
    use crate::tftp::shared::request_packet::{ReadRequestPacket, WriteRequestPacket};
    use crate::tftp::shared::{parse_packet, Serializable, TFTPPacket, STRIDE_SIZE};

    #[test]
    fn parse_one_byte_buffer() {
        let e = parse_packet(&[0]).unwrap_err();
        assert_eq!(e.details(), "Packet too short! [1 bytes]");
    }

    #[test]
    fn parse_empty_buffer() {
        assert!(parse_packet(&[]).is_err());
    }

    #[test]
    fn parse_unknown_opcode() {
        let e = parse_packet(&[0, 9, 0, 1]).unwrap_err();
        assert_eq!(e.details(), "Bad OP code! [9]");
    }

    #[test]
    fn parse_nonzero_high_opcode_byte() {
        // 0x0103 is not DATA even though the low byte is 3.
        assert!(parse_packet(&[1, 3, 0, 1]).is_err());
    }

    #[test]
    fn data_round_trip_every_block_number() {
        let payload = vec![0xAB; 17];
        for blk in 0..=u16::MAX {
            let p = TFTPPacket::DATA(DataPacket::new(blk, payload.clone()));
            assert_eq!(parse_packet(&p.serialize()).unwrap(), p);
        }
    }

    #[test]
    fn data_round_trip_every_payload_length() {
        for len in 0..=STRIDE_SIZE {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            for blk in [0, 1, 0x1234, u16::MAX] {
                let p = TFTPPacket::DATA(DataPacket::new(blk, payload.clone()));
                assert_eq!(parse_packet(&p.serialize()).unwrap(), p);
            }
        }
    }

    #[test]
    fn control_packets_round_trip() {
        let packets = vec![
            TFTPPacket::RRQ(ReadRequestPacket::new("a.txt")),
            TFTPPacket::WRQ(WriteRequestPacket::new("report.txt")),
            TFTPPacket::ACK(AckPacket::new(0)),
            TFTPPacket::ACK(AckPacket::new(u16::MAX)),
            TFTPPacket::ERR(ErrorPacket::new("File not found")),
        ];

        for p in packets {
            assert_eq!(parse_packet(&p.serialize()).unwrap(), p);
        }
    }

    #[test]
    fn display_names_the_packet() {
        let p = TFTPPacket::DATA(DataPacket::new(7, vec![1, 2, 3]));
        assert_eq!(p.to_string(), "DATA [7] (3 bytes)");
        let p = TFTPPacket::ERR(ErrorPacket::new("boom"));
        assert_eq!(p.to_string(), "ERR [5]: boom");
    }
}
