//! Datagram (UDP) binding.
//!
//! Every DATA block is acknowledged before the next one goes out. The sender
//! repeats an unacknowledged block every retransmit interval until the
//! per-block timeout runs out; the receiver answers a repeated block with
//! the ACK it already sent.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use async_std::future::timeout;
use async_std::net::UdpSocket;

use crate::tftp::config::Timing;
use crate::tftp::error::TransferError;
use crate::tftp::shared::data_channel::{AckOutcome, DataChannel, DataOutcome, TransferSummary};
use crate::tftp::shared::{parse_packet, Serializable, TFTPPacket};

/// Large enough to notice a DATA packet carrying more than 512 bytes.
pub const RECV_BUF_LEN: usize = 1024;

pub struct DatagramChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    locked: bool,
    timing: Timing,
}

impl DatagramChannel {
    /// Channel to a peer whose transfer address is already known.
    pub fn connected(socket: UdpSocket, peer: SocketAddr, timing: Timing) -> Self {
        DatagramChannel {
            socket,
            peer,
            locked: true,
            timing,
        }
    }

    /// Channel to a server's well known port. The server answers from a
    /// fresh port; the first reply fixes the peer for the rest of the
    /// transfer.
    pub fn requesting(socket: UdpSocket, server: SocketAddr, timing: Timing) -> Self {
        DatagramChannel {
            socket,
            peer: server,
            locked: false,
            timing,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub async fn send(&self, packet: &TFTPPacket) -> Result<(), TransferError> {
        self.send_raw(&packet.serialize()).await
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<(), TransferError> {
        self.socket.send_to(bytes, self.peer).await?;
        Ok(())
    }

    /// Waits up to `wait` for a packet from the peer, `None` if none came.
    ///
    /// Datagrams from other addresses and datagrams that don't decode are
    /// logged and dropped without cutting the wait short.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<TFTPPacket>, TransferError> {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let (count, addr) = match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };

            if !self.accepts(&addr) {
                log::warn!("Dropping datagram from unknown peer {}", addr);
                continue;
            }

            match parse_packet(&buf[..count]) {
                Ok(packet) => {
                    if !self.locked {
                        log::debug!("Transfer peer is {}", addr);
                        self.peer = addr;
                        self.locked = true;
                    }
                    return Ok(Some(packet));
                }
                Err(e) => log::warn!("Dropping datagram from {}: {}", addr, e),
            }
        }
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        if self.locked {
            *addr == self.peer
        } else {
            addr.ip() == self.peer.ip()
        }
    }

    /// Tells the peer why we gave up, when the failure is ours to report.
    pub async fn abandon(&self, err: &TransferError) {
        if let Some(packet) = err.error_packet() {
            if let Err(e) = self.send(&TFTPPacket::ERR(packet)).await {
                log::debug!("Could not deliver error to {}: {}", self.peer, e);
            }
        }
    }
}

/// Wildcard address of the same family as `remote`, on an ephemeral port.
pub fn any_local(remote: &SocketAddr) -> SocketAddr {
    let ip = match remote {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Sends every block of `dc`, each one only after the previous was
/// acknowledged.
pub async fn send_file(
    channel: &mut DatagramChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    let result = pump(channel, dc).await;
    if result.is_err() {
        dc.fail();
    }
    result
}

async fn pump(
    channel: &mut DatagramChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    while !dc.is_done() {
        let dp = dc.next_data()?;
        let blk = dp.blk();
        let bytes = TFTPPacket::DATA(dp).serialize();

        channel.send_raw(&bytes).await?;
        await_ack(channel, dc, blk, Some(&bytes)).await?;
    }

    dc.finish()
}

/// Waits for the ACK of `blk`, sending `resend` again every retransmit
/// interval, counted from the previous send whatever else arrives in
/// between. Gives up with [`TransferError::Timeout`] once the timeout has
/// elapsed, without sending anything more.
///
/// With `resend` left out this waits for the ACK 0 that accepts a write
/// request.
pub async fn await_ack(
    channel: &mut DatagramChannel,
    dc: &mut DataChannel,
    blk: u16,
    resend: Option<&[u8]>,
) -> Result<(), TransferError> {
    let timing = channel.timing();
    let deadline = Instant::now() + timing.timeout;
    let mut next_resend = Instant::now() + timing.retransmit;

    loop {
        let now = Instant::now();
        if now >= deadline {
            log::warn!("No ACK for block #{} from {}", blk, channel.peer());
            return Err(TransferError::Timeout { block: blk });
        }

        if now >= next_resend {
            if let Some(bytes) = resend {
                log::debug!("Retransmitting block #{}", blk);
                channel.send_raw(bytes).await?;
            }
            next_resend = Instant::now() + timing.retransmit;
        }

        let wait = deadline
            .min(next_resend)
            .saturating_duration_since(Instant::now());
        match channel.recv(wait).await? {
            None => {}
            Some(TFTPPacket::ACK(ap)) => match dc.on_ack(&ap) {
                AckOutcome::Accepted => return Ok(()),
                AckOutcome::Mismatch { expected, actual } => {
                    log::warn!("Ignoring ACK #{} while waiting for #{}", actual, expected);
                }
            },
            Some(TFTPPacket::ERR(ep)) => return Err(ep.into()),
            Some(other) => log::warn!("Ignoring {} while waiting for ACK #{}", other, blk),
        }
    }
}

/// Collects blocks into `dc`, acknowledging each, then stays on the socket
/// for a short while to answer a repeated last block.
pub async fn receive_file(
    channel: &mut DatagramChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    let summary = match collect(channel, dc).await {
        Ok(summary) => summary,
        Err(e) => {
            dc.fail();
            return Err(e);
        }
    };

    linger(channel, dc).await;
    Ok(summary)
}

async fn collect(
    channel: &mut DatagramChannel,
    dc: &mut DataChannel,
) -> Result<TransferSummary, TransferError> {
    let wait = channel.timing().timeout;
    let mut deadline = Instant::now() + wait;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let packet = match channel.recv(remaining).await? {
            Some(packet) => packet,
            None => {
                let block = dc.blk().wrapping_add(1);
                log::warn!("No DATA #{} from {}", block, channel.peer());
                return Err(TransferError::Timeout { block });
            }
        };

        match packet {
            TFTPPacket::DATA(dp) => match dc.on_data(dp) {
                DataOutcome::Accepted(ack) => {
                    // the last block is only acknowledged once it is stored
                    let summary = if dc.is_done() { Some(dc.finish()?) } else { None };
                    channel.send(&TFTPPacket::ACK(ack)).await?;
                    if let Some(summary) = summary {
                        return Ok(summary);
                    }
                    deadline = Instant::now() + wait;
                }
                DataOutcome::Duplicate(ack) => {
                    log::debug!("Block #{} repeated, acknowledging again", ack.blk());
                    channel.send(&TFTPPacket::ACK(ack)).await?;
                }
                DataOutcome::OutOfOrder { expected, actual } => {
                    log::warn!("Dropping block #{}, expected #{}", actual, expected);
                }
            },
            TFTPPacket::ERR(ep) => return Err(ep.into()),
            other => log::warn!("Ignoring {} while waiting for DATA", other),
        }
    }
}

async fn linger(channel: &mut DatagramChannel, dc: &mut DataChannel) {
    let deadline = Instant::now() + channel.timing().linger();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match channel.recv(remaining).await {
            Ok(Some(TFTPPacket::DATA(dp))) => {
                if let DataOutcome::Duplicate(ack) = dc.on_data(dp) {
                    log::debug!("Last block repeated, acknowledging again");
                    if channel.send(&TFTPPacket::ACK(ack)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return,
        }
    }
}
