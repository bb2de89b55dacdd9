use std::fmt;
use std::io::{self, Read, Write};

use pretty_bytes::converter::convert;

use crate::tftp::config::Binding;
use crate::tftp::error::TransferError;
use crate::tftp::shared::ack_packet::AckPacket;
use crate::tftp::shared::data_packet::DataPacket;
use crate::tftp::shared::STRIDE_SIZE;
use crate::tftp::storage::{Sink, Source};

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DataChannelMode {
    Tx,
    Rx,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DataChannelState {
    AwaitingTransfer,
    Sending,
    WaitAck,
    WaitLastAck,
    Receiving,
    Completed,
    Failed,
}

/// What the receiving side should do with a DATA packet it was handed.
#[derive(Debug, Eq, PartialEq)]
pub enum DataOutcome {
    /// The next block in sequence; acknowledge it.
    Accepted(AckPacket),
    /// The block acknowledged last arrived again; acknowledge it again.
    Duplicate(AckPacket),
    /// Anything else. Its payload was dropped.
    OutOfOrder { expected: u16, actual: u16 },
}

#[derive(Debug, Eq, PartialEq)]
pub enum AckOutcome {
    Accepted,
    Mismatch { expected: u16, actual: u16 },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferSummary {
    pub file_name: String,
    pub blocks: usize,
    pub bytes: usize,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] in {} blocks",
            self.file_name,
            convert(self.bytes as f64),
            self.blocks
        )
    }
}

/// Block-sequenced transfer of one file, without any I/O on the network.
///
/// The transports feed it the packets they receive and send the packets it
/// hands back. A sender reads 512 byte strides from its [`Source`]; the
/// stride shorter than that (possibly empty) is the last one, so a file that
/// is an exact multiple of the stride ends with an empty block. A receiver
/// buffers every payload and only writes its [`Sink`] once the whole file has
/// arrived.
pub struct DataChannel {
    file_name: String,
    mode: DataChannelMode,
    binding: Binding,
    state: DataChannelState,
    blk: u16,
    blocks: usize,
    bytes: usize,
    end_seen: bool,
    source: Option<Source>,
    sink: Option<Sink>,
    received: Vec<u8>,
}

impl DataChannel {
    /// Makes a channel that sends `source` as DATA blocks starting at 1.
    ///
    /// On the datagram binding every block has to be acknowledged before the
    /// next one is handed out.
    pub fn sender(file_name: &str, source: Source, binding: Binding) -> Self {
        DataChannel::new(file_name, DataChannelMode::Tx, binding, Some(source), None)
    }

    /// Makes a channel that collects DATA blocks into `sink`.
    pub fn receiver(file_name: &str, sink: Sink, binding: Binding) -> Self {
        DataChannel::new(file_name, DataChannelMode::Rx, binding, None, Some(sink))
    }

    fn new(
        file_name: &str,
        mode: DataChannelMode,
        binding: Binding,
        source: Option<Source>,
        sink: Option<Sink>,
    ) -> Self {
        DataChannel {
            file_name: file_name.to_string(),
            mode,
            binding,
            state: DataChannelState::AwaitingTransfer,
            blk: 0,
            blocks: 0,
            bytes: 0,
            end_seen: false,
            source,
            sink,
            received: Vec::new(),
        }
    }

    /// Reads the next stride from the source and wraps it in a DATA packet.
    pub fn next_data(&mut self) -> Result<DataPacket, TransferError> {
        if self.mode != DataChannelMode::Tx
            || self.end_seen
            || !matches!(
                self.state,
                DataChannelState::AwaitingTransfer | DataChannelState::Sending
            )
        {
            return Err(TransferError::Protocol(format!(
                "no data to send while {:?}",
                self.state
            )));
        }

        let Some(source) = self.source.as_mut() else {
            return Err(TransferError::Protocol(String::from("source already closed")));
        };

        let mut buf = vec![0; STRIDE_SIZE];
        let bytes_read = match read_stride(source, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.fail();
                return Err(TransferError::Storage(e));
            }
        };
        buf.truncate(bytes_read);

        self.blk = self.blk.wrapping_add(1);
        self.blocks += 1;
        self.bytes += bytes_read;

        if bytes_read < STRIDE_SIZE {
            self.end_seen = true;
            self.source = None;
        }

        self.state = match (self.binding, self.end_seen) {
            (Binding::Stream, _) => DataChannelState::Sending,
            (Binding::Datagram, false) => DataChannelState::WaitAck,
            (Binding::Datagram, true) => DataChannelState::WaitLastAck,
        };

        log::debug!("DATA #{} [{}]", self.blk, bytes_read);
        Ok(DataPacket::new(self.blk, buf))
    }

    /// Checks an ACK against the block in flight. ACK 0 accepts a write
    /// request before any block went out.
    pub fn on_ack(&mut self, ap: &AckPacket) -> AckOutcome {
        let awaiting = matches!(
            self.state,
            DataChannelState::WaitAck | DataChannelState::WaitLastAck
        ) || (self.state == DataChannelState::AwaitingTransfer && self.mode == DataChannelMode::Tx);

        if !awaiting || ap.blk() != self.blk {
            return AckOutcome::Mismatch {
                expected: self.blk,
                actual: ap.blk(),
            };
        }

        log::debug!("ACK #{}", ap.blk());
        self.state = DataChannelState::Sending;
        AckOutcome::Accepted
    }

    /// Takes the payload of the next block in sequence.
    pub fn on_data(&mut self, dp: DataPacket) -> DataOutcome {
        let expected = self.blk.wrapping_add(1);

        if self.mode != DataChannelMode::Rx || self.end_seen || dp.blk() != expected {
            if self.mode == DataChannelMode::Rx && self.blocks > 0 && dp.blk() == self.blk {
                return DataOutcome::Duplicate(AckPacket::new(self.blk));
            }
            return DataOutcome::OutOfOrder {
                expected,
                actual: dp.blk(),
            };
        }

        self.state = DataChannelState::Receiving;
        self.blk = expected;
        self.blocks += 1;
        self.end_seen = dp.is_last();

        let data = dp.into_data();
        self.bytes += data.len();
        self.received.extend_from_slice(&data);

        log::debug!("DATA #{} [{}]", self.blk, data.len());
        DataOutcome::Accepted(AckPacket::new(self.blk))
    }

    /// Nothing is left to send or receive.
    pub fn is_done(&self) -> bool {
        self.end_seen
            && matches!(
                self.state,
                DataChannelState::Sending | DataChannelState::Receiving
            )
    }

    /// Ends the transfer. A receiver checks that the block count matches the
    /// byte count and that the short block was seen, then flushes everything
    /// to its sink. On failure nothing is written.
    pub fn finish(&mut self) -> Result<TransferSummary, TransferError> {
        if !self.is_done() || !self.is_whole() {
            self.fail();
            return Err(TransferError::IncompleteTransfer {
                blocks: self.blocks,
                bytes: self.bytes,
            });
        }

        if let Some(mut sink) = self.sink.take() {
            let flushed = sink.write_all(&self.received).and_then(|_| sink.flush());
            if let Err(e) = flushed {
                self.fail();
                return Err(TransferError::Storage(e));
            }
            self.received = Vec::new();
        }

        self.state = DataChannelState::Completed;
        Ok(self.summary())
    }

    fn is_whole(&self) -> bool {
        self.blocks == self.bytes / STRIDE_SIZE + 1
    }

    /// Abandons the transfer and closes the file.
    pub fn fail(&mut self) {
        self.state = DataChannelState::Failed;
        self.source = None;
        self.sink = None;
        self.received = Vec::new();
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            file_name: self.file_name.clone(),
            blocks: self.blocks,
            bytes: self.bytes,
        }
    }

    pub fn state(&self) -> DataChannelState {
        self.state
    }

    /// Last block sent or received.
    pub fn blk(&self) -> u16 {
        self.blk
    }

    pub fn transfer_size(&self) -> usize {
        self.bytes
    }
}

/// Fills `buf` unless the source runs out first.
fn read_stride(source: &mut Source, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};
    use std::sync::{Arc, Mutex};

    use crate::tftp::config::Binding;
    use crate::tftp::error::TransferError;
    use crate::tftp::shared::ack_packet::AckPacket;
    use crate::tftp::shared::data_channel::{
        AckOutcome, DataChannel, DataChannelState, DataOutcome,
    };
    use crate::tftp::shared::data_packet::DataPacket;
    use crate::tftp::shared::STRIDE_SIZE;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out at most 100 bytes per read.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(100);
            self.0.read(&mut buf[..n])
        }
    }

    fn contents(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn sender(len: usize, binding: Binding) -> DataChannel {
        DataChannel::sender("f", Box::new(Cursor::new(contents(len))), binding)
    }

    fn drain(channel: &mut DataChannel) -> Vec<DataPacket> {
        let mut blocks = Vec::new();
        while !channel.is_done() {
            blocks.push(channel.next_data().unwrap());
        }
        blocks
    }

    #[test]
    fn splits_into_full_and_short_block() {
        let mut channel = sender(600, Binding::Stream);
        let blocks = drain(&mut channel);

        let sizes: Vec<usize> = blocks.iter().map(|b| b.data().len()).collect();
        let numbers: Vec<u16> = blocks.iter().map(|b| b.blk()).collect();
        assert_eq!(sizes, vec![512, 88]);
        assert_eq!(numbers, vec![1, 2]);

        let summary = channel.finish().unwrap();
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.bytes, 600);
        assert_eq!(channel.state(), DataChannelState::Completed);
    }

    #[test]
    fn exact_multiple_ends_with_empty_block() {
        let mut channel = sender(3 * STRIDE_SIZE, Binding::Stream);
        let blocks = drain(&mut channel);

        let sizes: Vec<usize> = blocks.iter().map(|b| b.data().len()).collect();
        assert_eq!(sizes, vec![512, 512, 512, 0]);
    }

    #[test]
    fn empty_file_is_one_empty_block() {
        let mut channel = sender(0, Binding::Stream);
        let blocks = drain(&mut channel);

        assert_eq!(blocks, vec![DataPacket::new(1, vec![])]);
    }

    #[test]
    fn short_reads_still_fill_strides() {
        let source = Box::new(Trickle(Cursor::new(contents(1000))));
        let mut channel = DataChannel::sender("f", source, Binding::Stream);
        let sizes: Vec<usize> = drain(&mut channel).iter().map(|b| b.data().len()).collect();

        assert_eq!(sizes, vec![512, 488]);
    }

    #[test]
    fn datagram_sender_waits_for_each_ack() {
        let mut channel = sender(STRIDE_SIZE + 1, Binding::Datagram);
        assert_eq!(channel.on_ack(&AckPacket::new(0)), AckOutcome::Accepted);

        assert_eq!(channel.next_data().unwrap().blk(), 1);
        assert_eq!(channel.state(), DataChannelState::WaitAck);
        assert!(channel.next_data().is_err());

        assert_eq!(
            channel.on_ack(&AckPacket::new(0)),
            AckOutcome::Mismatch {
                expected: 1,
                actual: 0
            }
        );
        assert_eq!(channel.on_ack(&AckPacket::new(1)), AckOutcome::Accepted);

        assert_eq!(channel.next_data().unwrap().blk(), 2);
        assert_eq!(channel.state(), DataChannelState::WaitLastAck);
        assert!(!channel.is_done());

        assert_eq!(channel.on_ack(&AckPacket::new(2)), AckOutcome::Accepted);
        assert!(channel.is_done());
        assert_eq!(channel.finish().unwrap().bytes, STRIDE_SIZE + 1);
    }

    #[test]
    fn receiver_reassembles_and_flushes_on_finish() {
        let sink = SharedSink::default();
        let mut channel = DataChannel::receiver("f", Box::new(sink.clone()), Binding::Stream);
        let data = contents(1300);

        for (i, chunk) in data.chunks(STRIDE_SIZE).enumerate() {
            let blk = (i + 1) as u16;
            assert_eq!(
                channel.on_data(DataPacket::new(blk, chunk.to_vec())),
                DataOutcome::Accepted(AckPacket::new(blk))
            );
        }

        assert!(channel.is_done());
        assert!(sink.0.lock().unwrap().is_empty());

        let summary = channel.finish().unwrap();
        assert_eq!(summary.blocks, 3);
        assert_eq!(*sink.0.lock().unwrap(), data);
    }

    #[test]
    fn receiver_skips_out_of_order_blocks() {
        let sink = SharedSink::default();
        let mut channel = DataChannel::receiver("f", Box::new(sink.clone()), Binding::Stream);

        assert_eq!(
            channel.on_data(DataPacket::new(2, vec![9; 10])),
            DataOutcome::OutOfOrder {
                expected: 1,
                actual: 2
            }
        );
        channel.on_data(DataPacket::new(1, vec![1; 10]));

        assert!(channel.is_done());
        channel.finish().unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec![1; 10]);
    }

    #[test]
    fn receiver_flags_duplicates() {
        let sink = SharedSink::default();
        let mut channel = DataChannel::receiver("f", Box::new(sink), Binding::Datagram);

        channel.on_data(DataPacket::new(1, vec![0; STRIDE_SIZE]));
        assert_eq!(
            channel.on_data(DataPacket::new(1, vec![0; STRIDE_SIZE])),
            DataOutcome::Duplicate(AckPacket::new(1))
        );
        assert_eq!(channel.transfer_size(), STRIDE_SIZE);
    }

    #[test]
    fn receiver_without_short_block_is_incomplete() {
        let sink = SharedSink::default();
        let mut channel = DataChannel::receiver("f", Box::new(sink.clone()), Binding::Stream);

        channel.on_data(DataPacket::new(1, vec![0; STRIDE_SIZE]));
        channel.on_data(DataPacket::new(2, vec![0; STRIDE_SIZE]));

        let err = channel.finish().unwrap_err();
        assert!(matches!(
            err,
            TransferError::IncompleteTransfer {
                blocks: 2,
                bytes: 1024
            }
        ));
        assert_eq!(channel.state(), DataChannelState::Failed);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn sender_to_receiver_for_boundary_sizes() {
        for len in [0, 1, 511, 512, 513, 1024, 5000] {
            let mut tx = sender(len, Binding::Stream);
            let sink = SharedSink::default();
            let mut rx = DataChannel::receiver("f", Box::new(sink.clone()), Binding::Stream);

            while !rx.is_done() {
                let dp = tx.next_data().unwrap();
                assert!(matches!(rx.on_data(dp), DataOutcome::Accepted(_)));
            }

            assert!(tx.is_done());
            assert_eq!(tx.finish().unwrap(), rx.finish().unwrap());
            assert_eq!(rx.summary().blocks, len / STRIDE_SIZE + 1);
            assert_eq!(*sink.0.lock().unwrap(), contents(len));
        }
    }
}
