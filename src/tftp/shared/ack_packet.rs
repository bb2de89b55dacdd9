//! ACK: opcode 4 followed by a block number.
//!
//! Only the datagram binding sends ACKs. ACK N confirms DATA block N, and a
//! server answers a WRQ with ACK 0 before the first block. The stream binding
//! never acknowledges anything.
use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{Deserializable, Serializable, TFTPPacket, TFTPParseError, OP_ACK};

const ACK_LEN: usize = 4;
const BLK_NUM_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AckPacket {
    blk: u16,
}

impl AckPacket {
    pub fn new(blk: u16) -> Self {
        AckPacket { blk }
    }

    /// Block being confirmed; 0 accepts a write request.
    pub fn blk(&self) -> u16 {
        self.blk
    }
}

impl Serializable for AckPacket {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_LEN);
        let _ = buf.write_u16::<NetworkEndian>(OP_ACK);
        let _ = buf.write_u16::<NetworkEndian>(self.blk);

        buf
    }
}

impl Deserializable for AckPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        if buf.len() < ACK_LEN {
            return Err(TFTPParseError::new("ACK too short!"));
        }

        let op = NetworkEndian::read_u16(buf);
        if op != OP_ACK {
            return Err(TFTPParseError::new(
                format!("Bad OP code! [{}]", op).as_str(),
            ));
        }

        let blk = NetworkEndian::read_u16(&buf[BLK_NUM_OFFSET..]);
        Ok(TFTPPacket::ACK(AckPacket::new(blk)))
    }
}

#[cfg(test)]
mod tests {
    use crate::tftp::shared::ack_packet::AckPacket;
    use crate::tftp::shared::{Deserializable, Serializable, TFTPPacket, OP_ACK};

    #[test]
    fn write_request_is_accepted_with_block_zero() {
        assert_eq!(AckPacket::new(0).serialize(), vec![0, 4, 0, 0]);
    }

    #[test]
    fn block_number_is_big_endian() {
        assert_eq!(AckPacket::new(0x1234).serialize(), vec![0, 4, 0x12, 0x34]);
        assert_eq!(
            AckPacket::deserialize(&[0, 4, 0xff, 0xff]).unwrap(),
            TFTPPacket::ACK(AckPacket::new(u16::MAX))
        );
    }

    #[test]
    fn deserialize_truncated_ack() {
        assert!(AckPacket::deserialize(&[0, 4, 0]).is_err());
    }

    #[test]
    fn deserialize_error() {
        let bad_op = OP_ACK + 1;
        let p = AckPacket::deserialize(&[0, bad_op as u8, 0, 42]).unwrap_err();
        assert_eq!(p.details(), format!("Bad OP code! [{}]", bad_op).as_str())
    }
}
