//! Stream sessions open with both peers exchanging a fixed token before any
//! packet is sent. The datagram binding has no connection phase and skips it.

use async_std::io::{prelude::*, Read, Write};

use crate::tftp::error::TransferError;

pub const HANDSHAKE_TOKEN: &[u8; 9] = b"HANDSHAKE";

/// Writes our token, then reads exactly as many bytes back and compares them.
///
/// Works on split halves so the caller can keep a buffered reader over the
/// same connection afterwards.
pub async fn exchange<R, W>(reader: &mut R, writer: &mut W) -> Result<(), TransferError>
where
    R: Read + Unpin,
    W: Write + Unpin,
{
    writer.write_all(HANDSHAKE_TOKEN).await?;
    writer.flush().await?;

    let mut token = [0u8; HANDSHAKE_TOKEN.len()];
    if let Err(e) = reader.read_exact(&mut token).await {
        return Err(TransferError::Protocol(format!(
            "connection closed during handshake: {}",
            e
        )));
    }

    if &token != HANDSHAKE_TOKEN {
        return Err(TransferError::Protocol(format!(
            "invalid handshake received: {:?}",
            String::from_utf8_lossy(&token)
        )));
    }

    log::debug!("Handshake complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_std::io::Cursor;

    use crate::tftp::error::TransferError;
    use crate::tftp::shared::handshake::{exchange, HANDSHAKE_TOKEN};

    #[async_std::test]
    async fn matching_tokens() {
        let mut reader = Cursor::new(HANDSHAKE_TOKEN.to_vec());
        let mut written = Vec::new();

        exchange(&mut reader, &mut written).await.unwrap();
        assert_eq!(written, HANDSHAKE_TOKEN.to_vec());
    }

    #[async_std::test]
    async fn mismatched_token() {
        let mut reader = Cursor::new(b"HANDSHAKX".to_vec());
        let mut written = Vec::new();

        let err = exchange(&mut reader, &mut written).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[async_std::test]
    async fn short_token() {
        let mut reader = Cursor::new(b"HAND".to_vec());
        let mut written = Vec::new();

        let err = exchange(&mut reader, &mut written).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }
}
