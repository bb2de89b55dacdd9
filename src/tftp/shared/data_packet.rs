use std::io::Write;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{
    Deserializable, Serializable, TFTPPacket, TFTPParseError, MIN_PACKET_LEN, OP_DATA, OP_LEN,
    STRIDE_SIZE,
};

const BLK_NUM_LEN: usize = 2;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DataPacket {
    op: u16,
    blk: u16,
    data: Vec<u8>,
}

impl DataPacket {
    pub fn new(blk: u16, data: Vec<u8>) -> Self {
        DataPacket {
            op: OP_DATA,
            blk,
            data,
        }
    }

    pub fn blk(&self) -> u16 {
        self.blk
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// A payload shorter than a full stride ends the transfer.
    pub fn is_last(&self) -> bool {
        self.data.len() < STRIDE_SIZE
    }
}

impl Serializable for DataPacket {
    fn serialize(&self) -> Vec<u8> {
        let buf_len = OP_LEN + BLK_NUM_LEN + self.data.len();
        let mut buf: Vec<u8> = Vec::with_capacity(buf_len);

        let _ = buf.write_u16::<NetworkEndian>(self.op);
        let _ = buf.write_u16::<NetworkEndian>(self.blk);
        let _ = buf.write_all(self.data.as_slice());

        buf
    }
}

impl Deserializable for DataPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(TFTPParseError::new("Packet too short!"));
        }

        let op: u16 = NetworkEndian::read_u16(&buf[0..2]);
        if OP_DATA != op {
            return Err(TFTPParseError::new("Bad OP code!"));
        }

        let blk = NetworkEndian::read_u16(&buf[2..4]);
        let data = &buf[4..];

        if data.len() > STRIDE_SIZE {
            return Err(TFTPParseError::new("Invalid data length"));
        }

        Ok(TFTPPacket::DATA(DataPacket::new(blk, data.to_vec())))
    }
}
