//! Stream (TCP) binding.
//!
//! Packets are framed by the stream itself: requests and errors end at their
//! string terminator, an ACK is four bytes and a DATA payload runs until 512
//! bytes were read or the sender shut down its half of the connection.
//! No block is ever acknowledged.

use std::io;
use std::net::Shutdown;

use async_std::io::{prelude::*, BufReader};
use async_std::net::TcpStream;
use byteorder::{ByteOrder, NetworkEndian};

use crate::tftp::error::TransferError;
use crate::tftp::shared::data_channel::{DataChannel, DataOutcome, TransferSummary};
use crate::tftp::shared::handshake;
use crate::tftp::shared::{
    parse_packet, Serializable, TFTPPacket, TFTPParseError, OP_ACK, OP_DATA, OP_ERR, OP_RRQ,
    OP_WRQ, STRIDE_SIZE,
};

/// Longest file name or error message accepted, terminator included.
const MAX_STRING_LEN: u64 = 1024;

pub struct StreamChannel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl StreamChannel {
    pub fn new(stream: TcpStream) -> Self {
        StreamChannel {
            reader: BufReader::new(stream.clone()),
            writer: stream,
        }
    }

    pub async fn handshake(&mut self) -> Result<(), TransferError> {
        handshake::exchange(&mut self.reader, &mut self.writer).await
    }

    pub async fn send(&mut self, packet: &TFTPPacket) -> Result<(), TransferError> {
        self.writer.write_all(&packet.serialize()).await?;
        Ok(())
    }

    /// Reads the next packet. `None` when the peer closed the connection
    /// between two packets.
    pub async fn recv(&mut self) -> Result<Option<TFTPPacket>, TransferError> {
        let mut buf = vec![0u8; 1];
        if self.reader.read(&mut buf).await? == 0 {
            return Ok(None);
        }
        self.read_fixed(&mut buf, 1).await?;

        match NetworkEndian::read_u16(&buf) {
            OP_RRQ | OP_WRQ => self.read_string(&mut buf).await?,
            OP_ERR => {
                self.read_fixed(&mut buf, 2).await?;
                self.read_string(&mut buf).await?;
            }
            OP_ACK => self.read_fixed(&mut buf, 2).await?,
            OP_DATA => {
                self.read_fixed(&mut buf, 2).await?;
                self.read_payload(&mut buf).await?;
            }
            // parse_packet names the bad opcode
            _ => self.read_fixed(&mut buf, 2).await?,
        }

        Ok(Some(parse_packet(&buf)?))
    }

    async fn read_fixed(&mut self, buf: &mut Vec<u8>, len: usize) -> Result<(), TransferError> {
        let start = buf.len();
        buf.resize(start + len, 0);
        match self.reader.read_exact(&mut buf[start..]).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(truncated()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_string(&mut self, buf: &mut Vec<u8>) -> Result<(), TransferError> {
        let start = buf.len();
        let n = (&mut self.reader)
            .take(MAX_STRING_LEN)
            .read_until(0, buf)
            .await?;
        match buf.last() {
            Some(0) if buf.len() > start => Ok(()),
            _ if n as u64 >= MAX_STRING_LEN => Err(TransferError::MalformedPacket(
                TFTPParseError::new("String too long!"),
            )),
            _ => Err(truncated()),
        }
    }

    async fn read_payload(&mut self, buf: &mut Vec<u8>) -> Result<(), TransferError> {
        let start = buf.len();
        buf.resize(start + STRIDE_SIZE, 0);

        let mut filled = 0;
        while filled < STRIDE_SIZE {
            let n = self.reader.read(&mut buf[start + filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        buf.truncate(start + filled);
        Ok(())
    }

    /// Shuts down our sending half; the peer reads that as the end of the
    /// last DATA block.
    pub fn close_write(&self) -> Result<(), TransferError> {
        self.writer.shutdown(Shutdown::Write)?;
        Ok(())
    }

    /// Tells the peer why we gave up, when the failure is ours to report.
    pub async fn abandon(&mut self, err: &TransferError) {
        if let Some(packet) = err.error_packet() {
            if let Err(e) = self.send(&TFTPPacket::ERR(packet)).await {
                log::debug!("Could not deliver error to peer: {}", e);
            }
        }
    }
}

fn truncated() -> TransferError {
    TransferError::MalformedPacket(TFTPParseError::new("Connection closed mid-packet!"))
}

/// Writes every block of `dc` back to back, then half-closes the connection.
pub async fn send_file(
    channel: &mut StreamChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    let result = pump(channel, dc).await;
    if result.is_err() {
        dc.fail();
    }
    result
}

async fn pump(
    channel: &mut StreamChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    while !dc.is_done() {
        let dp = dc.next_data()?;
        channel.send(&TFTPPacket::DATA(dp)).await?;
    }

    channel.close_write()?;
    dc.finish()
}

/// Reads blocks into `dc` until the short one arrives or the peer hangs up.
pub async fn receive_file(
    channel: &mut StreamChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    while !dc.is_done() {
        let packet = match channel.recv().await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                log::warn!("Connection closed after block #{}", dc.blk());
                break;
            }
            Err(e) => {
                dc.fail();
                return Err(e);
            }
        };

        match packet {
            TFTPPacket::DATA(dp) => match dc.on_data(dp) {
                DataOutcome::Accepted(_) => {}
                DataOutcome::Duplicate(ack) => {
                    log::warn!("Block #{} received twice", ack.blk());
                }
                DataOutcome::OutOfOrder { expected, actual } => {
                    log::warn!("Dropping block #{}, expected #{}", actual, expected);
                }
            },
            TFTPPacket::ERR(ep) => {
                dc.fail();
                return Err(ep.into());
            }
            other => {
                dc.fail();
                return Err(TransferError::Protocol(format!(
                    "unexpected {} during transfer",
                    other
                )));
            }
        }
    }

    dc.finish()
}
