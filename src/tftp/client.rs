//! Requester side: one download or upload per call.

use std::sync::Arc;

use async_std::net::{TcpStream, UdpSocket};

use crate::tftp::config::{Binding, ClientConfig};
use crate::tftp::datagram::{self, DatagramChannel};
use crate::tftp::dispatcher::base_name;
use crate::tftp::error::TransferError;
use crate::tftp::shared::data_channel::{DataChannel, TransferSummary};
use crate::tftp::shared::request_packet::{ReadRequestPacket, WriteRequestPacket};
use crate::tftp::shared::TFTPPacket;
use crate::tftp::storage::{DirStorage, Storage};
use crate::tftp::stream::{self, StreamChannel};

pub struct Client {
    config: ClientConfig,
    storage: Arc<dyn Storage>,
}

impl Client {
    /// Client keeping its files in `config.directory`.
    pub fn new(config: ClientConfig) -> Result<Client, TransferError> {
        let storage = DirStorage::new(&config.directory).map_err(TransferError::Storage)?;
        Ok(Client::with_storage(config, Arc::new(storage)))
    }

    pub fn with_storage(config: ClientConfig, storage: Arc<dyn Storage>) -> Client {
        Client { config, storage }
    }

    /// Fetches `file_name` from the server. A failed download leaves the
    /// local directory as it was.
    pub async fn download(&self, file_name: &str) -> Result<TransferSummary, TransferError> {
        let name = base_name(file_name)?;
        let sink = self.storage.open_for_write(&name)?;
        let mut dc = DataChannel::receiver(&name, sink, self.config.binding);

        let result = match self.config.binding {
            Binding::Stream => self.stream_download(&name, &mut dc).await,
            Binding::Datagram => self.datagram_download(&name, &mut dc).await,
        };

        if result.is_err() {
            dc.fail();
        }
        result
    }

    /// Sends `file_name` to the server.
    pub async fn upload(&self, file_name: &str) -> Result<TransferSummary, TransferError> {
        let name = base_name(file_name)?;
        let source = self.storage.open_for_read(&name)?;
        let mut dc = DataChannel::sender(&name, source, self.config.binding);

        let result = match self.config.binding {
            Binding::Stream => self.stream_upload(&name, &mut dc).await,
            Binding::Datagram => self.datagram_upload(&name, &mut dc).await,
        };

        if result.is_err() {
            dc.fail();
        }
        result
    }

    async fn connect(&self) -> Result<StreamChannel, TransferError> {
        let stream = TcpStream::connect(self.config.server).await?;
        log::debug!("Connected to {}", self.config.server);

        let mut channel = StreamChannel::new(stream);
        channel.handshake().await?;
        Ok(channel)
    }

    async fn stream_download(
        &self,
        name: &str,
        dc: &mut DataChannel,
    ) -> Result<TransferSummary, TransferError> {
        let mut channel = self.connect().await?;
        channel
            .send(&TFTPPacket::RRQ(ReadRequestPacket::new(name)))
            .await?;

        let result = stream::receive_file(&mut channel, dc).await;
        if let Err(e) = &result {
            channel.abandon(e).await;
        }
        result
    }

    async fn stream_upload(
        &self,
        name: &str,
        dc: &mut DataChannel,
    ) -> Result<TransferSummary, TransferError> {
        let mut channel = self.connect().await?;
        channel
            .send(&TFTPPacket::WRQ(WriteRequestPacket::new(name)))
            .await?;

        let sent = stream::send_file(&mut channel, dc).await;
        if let Err(e) = &sent {
            channel.abandon(e).await;
        }

        // The server hangs up once the file is stored, or says why it wasn't.
        match (sent, channel.recv().await) {
            (_, Ok(Some(TFTPPacket::ERR(ep)))) => Err(ep.into()),
            (Err(e), _) => Err(e),
            (Ok(summary), Ok(None)) => Ok(summary),
            (Ok(_), Ok(Some(other))) => Err(TransferError::Protocol(format!(
                "unexpected {} after upload",
                other
            ))),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    async fn open_datagram(&self) -> Result<DatagramChannel, TransferError> {
        let socket = UdpSocket::bind(datagram::any_local(&self.config.server)).await?;
        Ok(DatagramChannel::requesting(
            socket,
            self.config.server,
            self.config.timing,
        ))
    }

    async fn datagram_download(
        &self,
        name: &str,
        dc: &mut DataChannel,
    ) -> Result<TransferSummary, TransferError> {
        let mut channel = self.open_datagram().await?;
        channel
            .send(&TFTPPacket::RRQ(ReadRequestPacket::new(name)))
            .await?;

        let result = datagram::receive_file(&mut channel, dc).await;
        if let Err(e) = &result {
            channel.abandon(e).await;
        }
        result
    }

    async fn datagram_upload(
        &self,
        name: &str,
        dc: &mut DataChannel,
    ) -> Result<TransferSummary, TransferError> {
        let mut channel = self.open_datagram().await?;
        channel
            .send(&TFTPPacket::WRQ(WriteRequestPacket::new(name)))
            .await?;

        let result = match datagram::await_ack(&mut channel, dc, 0, None).await {
            Ok(()) => datagram::send_file(&mut channel, dc).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            channel.abandon(e).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use async_std::net::UdpSocket;
    use tempfile::TempDir;

    use crate::tftp::client::Client;
    use crate::tftp::config::{Binding, ClientConfig, Timing};
    use crate::tftp::error::TransferError;

    fn quick() -> Timing {
        Timing::new(Duration::from_millis(300), Duration::from_millis(100))
    }

    #[async_std::test]
    async fn upload_of_a_missing_file_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new(server.local_addr().unwrap(), Binding::Datagram)
            .with_directory(dir.path())
            .with_timing(quick());

        let err = Client::new(config).unwrap().upload("nope").await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(name) if name == "nope"));
    }

    #[async_std::test]
    async fn silent_server_times_out_and_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new(server.local_addr().unwrap(), Binding::Datagram)
            .with_directory(dir.path())
            .with_timing(quick());

        let err = Client::new(config)
            .unwrap()
            .download("../remote/a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout { block: 1 }));
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[async_std::test]
    async fn failed_download_keeps_the_existing_local_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), b"precious local data").unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new(server.local_addr().unwrap(), Binding::Datagram)
            .with_directory(dir.path())
            .with_timing(quick());

        let err = Client::new(config)
            .unwrap()
            .download("notes.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout { block: 1 }));
        assert_eq!(
            fs::read(dir.path().join("notes.txt")).unwrap(),
            b"precious local data"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[async_std::test]
    async fn upload_without_ack_zero_times_out() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), b"abc").unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new(server.local_addr().unwrap(), Binding::Datagram)
            .with_directory(dir.path())
            .with_timing(quick());

        let err = Client::new(config).unwrap().upload("f").await.unwrap_err();
        assert!(matches!(err, TransferError::Timeout { block: 0 }));
    }

    #[async_std::test]
    async fn names_without_a_file_are_refused_locally() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::default().with_directory(dir.path());

        let err = Client::new(config).unwrap().download("..").await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }
}
