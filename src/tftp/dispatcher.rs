//! Turns the first packet of a session into the transfer the server runs.

use crate::tftp::error::TransferError;
use crate::tftp::shared::request_packet::Request;
use crate::tftp::shared::TFTPPacket;

#[derive(Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Read request: the server sends the named file.
    Send(String),
    /// Write request: the server receives the named file.
    Receive(String),
}

pub fn dispatch(packet: &TFTPPacket) -> Result<Dispatch, TransferError> {
    match packet {
        TFTPPacket::RRQ(rrq) => Ok(Dispatch::Send(base_name(rrq.filename())?)),
        TFTPPacket::WRQ(wrq) => Ok(Dispatch::Receive(base_name(wrq.filename())?)),
        other => Err(TransferError::Protocol(format!(
            "expected a request, got {}",
            other
        ))),
    }
}

/// Strips every directory component from a requested name so it can only
/// address a file directly under the storage root.
pub fn base_name(requested: &str) -> Result<String, TransferError> {
    let name = requested
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    match name {
        "" | "." | ".." => Err(TransferError::Protocol(format!(
            "invalid file name {:?}",
            requested
        ))),
        _ => Ok(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use crate::tftp::dispatcher::{base_name, dispatch, Dispatch};
    use crate::tftp::error::TransferError;
    use crate::tftp::shared::ack_packet::AckPacket;
    use crate::tftp::shared::request_packet::{ReadRequestPacket, WriteRequestPacket};
    use crate::tftp::shared::TFTPPacket;

    #[test]
    fn requests_pick_the_direction() {
        assert_eq!(
            dispatch(&TFTPPacket::RRQ(ReadRequestPacket::new("a.txt"))).unwrap(),
            Dispatch::Send("a.txt".into())
        );
        assert_eq!(
            dispatch(&TFTPPacket::WRQ(WriteRequestPacket::new("b.bin"))).unwrap(),
            Dispatch::Receive("b.bin".into())
        );
    }

    #[test]
    fn anything_else_is_a_protocol_error() {
        let err = dispatch(&TFTPPacket::ACK(AckPacket::new(0))).unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn directories_are_stripped() {
        assert_eq!(base_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(base_name("/tmp/report.txt").unwrap(), "report.txt");
        assert_eq!(base_name("dir\\file.bin").unwrap(), "file.bin");
        assert_eq!(base_name("plain").unwrap(), "plain");
    }

    #[test]
    fn names_without_a_file_are_rejected() {
        for name in ["", ".", "..", "/", "dir/", "a/.."] {
            assert!(base_name(name).is_err(), "{:?} accepted", name);
        }
    }
}
