/// ERROR packet can be the acknowledgment of any other type of packet.
/// There is no taxonomy of error codes: every packet sent carries code 5
/// and a human readable message terminated with a zero byte. The receiver
/// only logs it.
use std::io::Write;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{
    read_terminated, Deserializable, Serializable, TFTPPacket, TFTPParseError, MIN_PACKET_LEN,
    OP_ERR,
};

const ERR_LEN: usize = 4;
const ERR_CODE_OFFSET: usize = 2;
const ERR_MSG_OFFSET: usize = 4;
/// The only error code this protocol sends.
pub const ERR_CODE: u16 = 5;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorPacket {
    op: u16,
    code: u16,
    err: String,
}

impl ErrorPacket {
    pub fn new(msg: &str) -> Self {
        ErrorPacket::with_code(ERR_CODE, msg)
    }

    fn with_code(code: u16, msg: &str) -> Self {
        ErrorPacket {
            op: OP_ERR,
            code,
            err: msg.trim_end_matches('\0').to_string(),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn err(&self) -> &str {
        &self.err
    }
}

impl Serializable for ErrorPacket {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ERR_LEN + self.err.len() + 1);
        let _ = buf.write_u16::<NetworkEndian>(self.op);
        let _ = buf.write_u16::<NetworkEndian>(self.code);
        let _ = buf.write_all(self.err.as_bytes());
        let _ = buf.write_u8(0);
        buf
    }
}

impl Deserializable for ErrorPacket {
    fn deserialize(buf: &[u8]) -> Result<TFTPPacket, TFTPParseError> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(TFTPParseError::new("Packet too short!"));
        }

        let op = NetworkEndian::read_u16(buf);

        if op != OP_ERR {
            return Err(TFTPParseError::new(
                format!("Bad OP code! [{}]", op).as_str(),
            ));
        }

        let code = NetworkEndian::read_u16(&buf[ERR_CODE_OFFSET..]);
        let msg = String::from_utf8_lossy(read_terminated(buf, ERR_MSG_OFFSET)?);

        Ok(TFTPPacket::ERR(ErrorPacket::with_code(code, &msg)))
    }
}
