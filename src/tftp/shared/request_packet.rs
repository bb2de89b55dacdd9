/// RRQ and WRQ packets open a transfer. The filename follows the opcode
/// and is terminated with a zero byte; there is no mode string. Anything
/// after the terminator is ignored so RFC 1350 style requests still parse.
use std::io::Write;
use std::str;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{
    read_terminated, Deserializable, Serializable, TFTPPacket, TFTPParseError, OP_LEN, OP_RRQ,
    OP_WRQ,
};

pub trait Request: Serializable {
    fn op(&self) -> u16;
    fn filename(&self) -> &str;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReadRequestPacket {
    req: RequestPacket,
}

impl ReadRequestPacket {
    pub fn new(filename: &str) -> ReadRequestPacket {
        ReadRequestPacket {
            req: RequestPacket::new(OP_RRQ, filename),
        }
    }
}

impl Request for ReadRequestPacket {
    fn op(&self) -> u16 {
        self.req.op
    }

    fn filename(&self) -> &str {
        &self.req.filename
    }
}

impl Serializable for ReadRequestPacket {
    fn serialize(&self) -> Vec<u8> {
        self.req.serialize()
    }
}

impl Deserializable for ReadRequestPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        RequestPacket::deserialize(buf)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WriteRequestPacket {
    req: RequestPacket,
}

impl WriteRequestPacket {
    pub fn new(filename: &str) -> WriteRequestPacket {
        WriteRequestPacket {
            req: RequestPacket::new(OP_WRQ, filename),
        }
    }
}

impl Request for WriteRequestPacket {
    fn op(&self) -> u16 {
        self.req.op
    }

    fn filename(&self) -> &str {
        &self.req.filename
    }
}

impl Serializable for WriteRequestPacket {
    fn serialize(&self) -> Vec<u8> {
        self.req.serialize()
    }
}

impl Deserializable for WriteRequestPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        RequestPacket::deserialize(buf)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct RequestPacket {
    op: u16,
    filename: String,
}

impl RequestPacket {
    fn new(op: u16, filename: &str) -> Self {
        RequestPacket {
            op,
            filename: String::from(filename),
        }
    }
}

impl Serializable for RequestPacket {
    fn serialize(&self) -> Vec<u8> {
        let length = OP_LEN + self.filename.len() + 1;
        let mut buf = Vec::with_capacity(length);

        // Writes into a Vec cannot fail.
        let _ = buf.write_u16::<NetworkEndian>(self.op);
        let _ = buf.write_all(self.filename.as_bytes());
        let _ = buf.write_u8(0);
        buf
    }
}

impl Deserializable for RequestPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        if buf.len() < OP_LEN {
            return Err(TFTPParseError::new("Packet too short!"));
        }

        let op: u16 = NetworkEndian::read_u16(&buf[0..2]);
        if ![OP_RRQ, OP_WRQ].contains(&op) {
            return Err(TFTPParseError::new("Bad OP code!"));
        }

        let raw_name = read_terminated(buf, OP_LEN)?;
        let filename = str::from_utf8(raw_name)
            .map_err(|_| TFTPParseError::new("Filename is not valid UTF-8!"))?;

        let packet = if op == OP_RRQ {
            TFTPPacket::RRQ(ReadRequestPacket::new(filename))
        } else {
            TFTPPacket::WRQ(WriteRequestPacket::new(filename))
        };

        Ok(packet)
    }
}
