use std::io;

use thiserror::Error;

use crate::tftp::shared::err_packet::ErrorPacket;
use crate::tftp::shared::TFTPParseError;

/// Why a session or transfer ended without completing.
#[derive(Error, Debug)]
pub enum TransferError {
    /// A buffer could not be decoded into a packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] TFTPParseError),

    /// The peer broke the protocol (bad handshake, unexpected opcode).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No acknowledgment (or data) arrived in time for the given block.
    #[error("timed out waiting on block {block}")]
    Timeout { block: u16 },

    /// The received blocks and byte count do not describe a whole file.
    #[error("incomplete transfer: {blocks} blocks carrying {bytes} bytes")]
    IncompleteTransfer { blocks: usize, bytes: usize },

    /// The requested source file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Reading or writing local storage failed.
    #[error("storage error: {0}")]
    Storage(#[source] io::Error),

    /// The peer sent an ERROR packet.
    #[error("peer reported error {code}: {message}")]
    Remote { code: u16, message: String },

    /// The transport itself failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Local failures are reported to the peer once; timeouts, transport
    /// failures and the peer's own errors are not.
    pub fn error_packet(&self) -> Option<ErrorPacket> {
        let msg = match self {
            TransferError::NotFound(_) => String::from("File not found"),
            TransferError::Storage(e) => format!("Storage failure: {}", e),
            TransferError::IncompleteTransfer { .. } => String::from("Incomplete transfer"),
            TransferError::Protocol(m) => format!("Illegal operation: {}", m),
            TransferError::MalformedPacket(e) => e.to_string(),
            TransferError::Timeout { .. } | TransferError::Remote { .. } | TransferError::Io(_) => {
                return None
            }
        };

        Some(ErrorPacket::new(&msg))
    }
}

impl From<ErrorPacket> for TransferError {
    fn from(ep: ErrorPacket) -> Self {
        TransferError::Remote {
            code: ep.code(),
            message: ep.err().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use crate::tftp::error::TransferError;
    use crate::tftp::shared::err_packet::{ErrorPacket, ERR_CODE};

    #[test]
    fn local_failures_produce_error_packets() {
        let p = TransferError::NotFound("a.txt".into()).error_packet().unwrap();
        assert_eq!(p.code(), ERR_CODE);
        assert_eq!(p.err(), "File not found");

        let p = TransferError::Storage(io::Error::other("disk full"))
            .error_packet()
            .unwrap();
        assert_eq!(p.err(), "Storage failure: disk full");
    }

    #[test]
    fn timeouts_are_not_reported() {
        assert!(TransferError::Timeout { block: 3 }.error_packet().is_none());
        assert!(TransferError::Io(io::ErrorKind::BrokenPipe.into())
            .error_packet()
            .is_none());
    }

    #[test]
    fn remote_errors_are_not_echoed() {
        let err = TransferError::from(ErrorPacket::new("nope"));
        assert!(matches!(
            &err,
            TransferError::Remote { code: 5, message } if message == "nope"
        ));
        assert!(err.error_packet().is_none());
    }
}
