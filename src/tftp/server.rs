//! Responder side: accept loops and the session each request runs.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_std::net::{TcpListener, TcpStream, UdpSocket};
use async_std::task;

use crate::tftp::config::{Binding, ServerConfig, Timing};
use crate::tftp::datagram::{self, DatagramChannel, RECV_BUF_LEN};
use crate::tftp::dispatcher::{dispatch, Dispatch};
use crate::tftp::error::TransferError;
use crate::tftp::shared::ack_packet::AckPacket;
use crate::tftp::shared::data_channel::{DataChannel, TransferSummary};
use crate::tftp::shared::{parse_packet, TFTPPacket};
use crate::tftp::storage::{DirStorage, Storage};
use crate::tftp::stream::{self, StreamChannel};

/// Pause after a failed accept or receive on the listening socket.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum Listener {
    Stream(TcpListener),
    Datagram(UdpSocket),
}

/// A server bound to its well known address, serving any number of
/// clients concurrently.
pub struct Server {
    listener: Listener,
    storage: Arc<dyn Storage>,
    timing: Timing,
}

impl Server {
    /// Binds `config.address` and serves files out of `config.directory`.
    pub async fn bind(config: &ServerConfig) -> Result<Server, TransferError> {
        let storage = DirStorage::new(&config.directory).map_err(TransferError::Storage)?;
        Server::with_storage(config, Arc::new(storage)).await
    }

    pub async fn with_storage(
        config: &ServerConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Server, TransferError> {
        let listener = match config.binding {
            Binding::Stream => Listener::Stream(TcpListener::bind(config.address).await?),
            Binding::Datagram => Listener::Datagram(UdpSocket::bind(config.address).await?),
        };

        Ok(Server {
            listener,
            storage,
            timing: config.timing,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Listener::Stream(listener) => listener.local_addr(),
            Listener::Datagram(socket) => socket.local_addr(),
        }
    }

    /// Runs the accept loop. Only returns if the listening socket fails.
    pub async fn serve(self) -> Result<(), TransferError> {
        match self.listener {
            Listener::Stream(listener) => accept_connections(listener, self.storage).await,
            Listener::Datagram(socket) => accept_requests(socket, self.storage, self.timing).await,
        }
    }
}

async fn accept_connections(
    listener: TcpListener,
    storage: Arc<dyn Storage>,
) -> Result<(), TransferError> {
    log::info!("Listening on tcp://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                back_off("accept a connection", e).await;
                continue;
            }
        };

        log::info!("Connection established with client {}", peer);
        let storage = Arc::clone(&storage);
        task::spawn(async move {
            report(peer, serve_stream_session(stream, storage).await);
        });
    }
}

/// Each request gets its own task and its own ephemeral socket; the well
/// known port only ever sees first packets.
async fn accept_requests(
    socket: UdpSocket,
    storage: Arc<dyn Storage>,
    timing: Timing,
) -> Result<(), TransferError> {
    let local = socket.local_addr()?;
    log::info!("Listening on udp://{}", local);

    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let (count, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                back_off("receive a request", e).await;
                continue;
            }
        };

        let request = match parse_packet(&buf[..count]) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Dropping datagram from {}: {}", peer, e);
                continue;
            }
        };

        let session = match UdpSocket::bind(SocketAddr::new(local.ip(), 0)).await {
            Ok(session) => session,
            Err(e) => {
                log::error!("No transfer socket for {}: {}", peer, e);
                continue;
            }
        };

        log::info!("{} from {}", request, peer);
        let storage = Arc::clone(&storage);
        task::spawn(async move {
            report(
                peer,
                serve_datagram_session(session, peer, request, storage, timing).await,
            );
        });
    }
}

/// Logs a listening socket failure and waits before the next attempt.
async fn back_off(what: &str, e: io::Error) {
    log::error!("Failed to {}: {}", what, e);
    task::sleep(ACCEPT_BACKOFF).await;
}

fn report(peer: SocketAddr, result: Result<TransferSummary, TransferError>) {
    match result {
        Ok(summary) => log::info!("[{}] transferred {}", peer, summary),
        Err(e) => log::error!("[{}] session failed: {}", peer, e),
    }
}

/// Runs one stream session to completion: handshake, request, transfer.
///
/// A failure of our own is reported to the client with a single ERROR
/// packet before the connection is dropped.
pub async fn serve_stream_session(
    stream: TcpStream,
    storage: Arc<dyn Storage>,
) -> Result<TransferSummary, TransferError> {
    let mut channel = StreamChannel::new(stream);

    let result = stream_session(&mut channel, storage.as_ref()).await;
    if let Err(e) = &result {
        channel.abandon(e).await;
    }
    result
}

async fn stream_session(
    channel: &mut StreamChannel,
    storage: &dyn Storage,
) -> Result<TransferSummary, TransferError> {
    channel.handshake().await?;

    let request = channel.recv().await?.ok_or_else(|| {
        TransferError::Protocol(String::from("connection closed before a request arrived"))
    })?;
    log::debug!("{}", request);

    match dispatch(&request)? {
        Dispatch::Send(name) => {
            let mut dc = DataChannel::sender(&name, storage.open_for_read(&name)?, Binding::Stream);
            stream::send_file(channel, &mut dc).await
        }
        Dispatch::Receive(name) => {
            let sink = storage.open_for_write(&name)?;
            let mut dc = DataChannel::receiver(&name, sink, Binding::Stream);
            stream::receive_file(channel, &mut dc).await
        }
    }
}

/// Runs the transfer `request` asks for over `socket`, talking to `peer`
/// only.
pub async fn serve_datagram_session(
    socket: UdpSocket,
    peer: SocketAddr,
    request: TFTPPacket,
    storage: Arc<dyn Storage>,
    timing: Timing,
) -> Result<TransferSummary, TransferError> {
    let mut channel = DatagramChannel::connected(socket, peer, timing);

    let result = datagram_session(&mut channel, &request, storage.as_ref()).await;
    if let Err(e) = &result {
        channel.abandon(e).await;
    }
    result
}

async fn datagram_session(
    channel: &mut DatagramChannel,
    request: &TFTPPacket,
    storage: &dyn Storage,
) -> Result<TransferSummary, TransferError> {
    match dispatch(request)? {
        Dispatch::Send(name) => {
            let source = storage.open_for_read(&name)?;
            let mut dc = DataChannel::sender(&name, source, Binding::Datagram);
            datagram::send_file(channel, &mut dc).await
        }
        Dispatch::Receive(name) => {
            let sink = storage.open_for_write(&name)?;
            let mut dc = DataChannel::receiver(&name, sink, Binding::Datagram);

            match channel.send(&TFTPPacket::ACK(AckPacket::new(0))).await {
                Ok(()) => datagram::receive_file(channel, &mut dc).await,
                Err(e) => {
                    dc.fail();
                    Err(e)
                }
            }
        }
    }
}
