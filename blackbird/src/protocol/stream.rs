//! Per-characteristic packet stream.
//!
//! Each of the three command characteristics carries its own stream
//! with its own 4-bit sequence counter. The counter lives on both ends
//! and advances only after a message has been read and acknowledged,
//! so the sid on the wire detects reordering and loss.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::frame::{FRAME_END, FRAME_START};
use super::message::Message;
use crate::BlackbirdError;
use crate::ble::GattLink;

/// Default deadline for [`PacketStream::read`].
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// One logical channel over a notify characteristic.
#[derive(Debug)]
pub struct PacketStream<L: GattLink> {
    link: Arc<L>,
    characteristic: Uuid,
    seq: u8,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    rx_buf: Vec<u8>,
    queue: VecDeque<Message>,
    write_fault: Option<BlackbirdError>,
}

impl<L: GattLink> PacketStream<L> {
    /// Subscribes to the characteristic and waits out the hardware
    /// quiet-time before the stream is usable.
    pub async fn open(link: Arc<L>, characteristic: Uuid) -> Result<Self, BlackbirdError> {
        let rx = link.subscribe(characteristic).await?;
        tokio::time::sleep(link.settle_delay()).await;
        Ok(Self {
            link,
            characteristic,
            seq: 0,
            rx,
            rx_buf: Vec::new(),
            queue: VecDeque::new(),
            write_fault: None,
        })
    }

    /// Feeds one notification packet into the reassembly buffer.
    ///
    /// A frame is complete when the newest byte is the end delimiter;
    /// `0x7F` inside a body is escaped, so this cannot fire early when
    /// notifications fragment a frame.
    fn on_bytes(&mut self, packet: &[u8]) -> Result<(), BlackbirdError> {
        trace!("rx({}): {:02x?}", self.characteristic, packet);
        self.rx_buf.extend_from_slice(packet);
        if self.rx_buf.first() != Some(&FRAME_START) {
            self.rx_buf.clear();
            return Err(BlackbirdError::BadDelimiter);
        }
        if self.rx_buf.last() == Some(&FRAME_END) {
            let message = Message::from_bytes(&self.rx_buf);
            // a bad frame is discarded either way; later frames may proceed
            self.rx_buf.clear();
            self.queue.push_back(message?);
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Message, BlackbirdError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }
            let packet = self
                .rx
                .recv()
                .await
                .ok_or(BlackbirdError::TransportClosed)?;
            self.on_bytes(&packet)?;
        }
    }

    /// Waits for the next message, validates its sid against the
    /// lock-step counter, and acknowledges it.
    ///
    /// The ack carries the received sid; the counter advances after
    /// the ack goes out. Acks are best-effort: a failed ack transmit
    /// does not suppress the message, it surfaces on the next
    /// [`Self::write`]. On timeout the stream is left intact, so an
    /// in-flight frame stays buffered for the next read.
    pub async fn read(&mut self, timeout: Duration) -> Result<Message, BlackbirdError> {
        let message = match tokio::time::timeout(timeout, self.next_message()).await {
            Ok(message) => message?,
            Err(_) => return Err(BlackbirdError::Timeout),
        };
        if message.sid != self.seq {
            return Err(BlackbirdError::SequenceSkew {
                expected: self.seq,
                got: message.sid,
            });
        }
        if let Err(e) = self.transmit(&message.ack()).await {
            warn!("ack transmit failed on {}: {e}", self.characteristic);
            self.write_fault = Some(e);
        }
        self.seq = (self.seq + 1) & 0x0F;
        Ok(message)
    }

    /// Serializes with the stream's current sequence id and transmits.
    /// Re-raises a pending ack transmit failure first.
    pub async fn write(&mut self, message: &Message) -> Result<(), BlackbirdError> {
        if let Some(fault) = self.write_fault.take() {
            return Err(fault);
        }
        self.transmit(message).await
    }

    async fn transmit(&mut self, message: &Message) -> Result<(), BlackbirdError> {
        let data = message.to_bytes(self.seq);
        debug!("tx({}): {:02x?}", self.characteristic, data);
        self.link.write_char(self.characteristic, &data).await
    }

    /// Drops the reassembly buffer, the message queue, and any packets
    /// still in flight. Used after error recovery.
    pub fn clear(&mut self) {
        self.rx_buf.clear();
        self.queue.clear();
        self.write_fault = None;
        while self.rx.try_recv().is_ok() {}
    }

    /// Releases the characteristic subscription.
    pub async fn close(&mut self) -> Result<(), BlackbirdError> {
        self.link.unsubscribe(self.characteristic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::testing::FakeLink;
    use crate::protocol::message::Body;
    use crate::protocol::{CmdType, TransType, UUID_COMMON_GET, unpack_header};

    const SHORT: Duration = Duration::from_millis(50);

    fn status_frame(sid: u8) -> Vec<u8> {
        Message {
            sid,
            body: Body::FileStatus,
        }
        .to_bytes(sid)
    }

    async fn open_stream(link: &Arc<FakeLink>) -> PacketStream<FakeLink> {
        PacketStream::open(Arc::clone(link), UUID_COMMON_GET)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn in_order_frames_are_read_and_acked() {
        let link = Arc::new(FakeLink::new());
        for sid in 0..20u8 {
            link.notify(UUID_COMMON_GET, status_frame(sid & 0x0F));
        }
        let mut stream = open_stream(&link).await;

        for _ in 0..20 {
            let message = stream.read(SHORT).await.unwrap();
            assert_eq!(message.body, Body::FileStatus);
        }

        // every read acked with the sid it consumed, wrapping at 16
        let written = link.written();
        assert_eq!(written.len(), 20);
        for (index, (characteristic, data)) in written.iter().enumerate() {
            assert_eq!(*characteristic, UUID_COMMON_GET);
            let ack = Message::from_bytes(data).unwrap();
            assert_eq!(ack.body, Body::Ack(CmdType::Get));
            assert_eq!(usize::from(ack.sid), index & 0x0F);
        }
    }

    #[tokio::test]
    async fn skewed_sid_fails_at_that_read_and_not_earlier() {
        let link = Arc::new(FakeLink::new());
        link.notify(UUID_COMMON_GET, status_frame(0));
        link.notify(UUID_COMMON_GET, status_frame(1));
        link.notify(UUID_COMMON_GET, status_frame(3));
        let mut stream = open_stream(&link).await;

        stream.read(SHORT).await.unwrap();
        stream.read(SHORT).await.unwrap();
        assert!(matches!(
            stream.read(SHORT).await,
            Err(BlackbirdError::SequenceSkew {
                expected: 2,
                got: 3
            })
        ));
    }

    #[tokio::test]
    async fn fragmented_frame_reassembles() {
        let link = Arc::new(FakeLink::new());
        let frame = status_frame(0);
        let (head, tail) = frame.split_at(frame.len() / 2);
        link.notify(UUID_COMMON_GET, head.to_vec());
        link.notify(UUID_COMMON_GET, tail.to_vec());
        let mut stream = open_stream(&link).await;

        let message = stream.read(SHORT).await.unwrap();
        assert_eq!(message.body, Body::FileStatus);
    }

    #[tokio::test]
    async fn stray_bytes_without_start_delimiter_are_discarded() {
        let link = Arc::new(FakeLink::new());
        link.notify(UUID_COMMON_GET, vec![0x00, 0x01, 0x02]);
        link.notify(UUID_COMMON_GET, status_frame(0));
        let mut stream = open_stream(&link).await;

        assert!(matches!(
            stream.read(SHORT).await,
            Err(BlackbirdError::BadDelimiter)
        ));
        // the buffer was discarded; the following frame still decodes
        let message = stream.read(SHORT).await.unwrap();
        assert_eq!(message.body, Body::FileStatus);
    }

    #[tokio::test]
    async fn read_times_out_and_leaves_the_stream_intact() {
        let link = Arc::new(FakeLink::new());
        let frame = status_frame(0);
        link.notify(UUID_COMMON_GET, frame[..3].to_vec());
        let mut stream = open_stream(&link).await;

        assert!(matches!(
            stream.read(SHORT).await,
            Err(BlackbirdError::Timeout)
        ));

        // the rest of the frame arrives and completes the buffered head
        link.notify(UUID_COMMON_GET, frame[3..].to_vec());
        let message = stream.read(SHORT).await.unwrap();
        assert_eq!(message.body, Body::FileStatus);
    }

    #[tokio::test]
    async fn write_stamps_the_stream_sequence() {
        let link = Arc::new(FakeLink::new());
        link.notify(UUID_COMMON_GET, status_frame(0));
        let mut stream = open_stream(&link).await;
        stream.read(SHORT).await.unwrap();

        stream.write(&Message::new(Body::GetDeviceInfo)).await.unwrap();
        let written = stream.link.written();
        let (_, data) = written.last().unwrap();
        let body = crate::protocol::frame::deframe(data).unwrap();
        let (_, trans, sid) = unpack_header(body[0]).unwrap();
        assert_eq!(trans, TransType::Default);
        assert_eq!(sid, 1);
    }

    #[tokio::test]
    async fn failed_ack_surfaces_on_the_next_write() {
        let link = Arc::new(FakeLink::new());
        link.notify(UUID_COMMON_GET, status_frame(0));
        let mut stream = open_stream(&link).await;

        link.fail_writes(true);
        // the message is still delivered even though its ack was lost
        let message = stream.read(SHORT).await.unwrap();
        assert_eq!(message.body, Body::FileStatus);

        link.fail_writes(false);
        assert!(matches!(
            stream.write(&Message::new(Body::GetDeviceInfo)).await,
            Err(BlackbirdError::TransportClosed)
        ));
        // the fault is consumed; writes work again
        stream.write(&Message::new(Body::GetDeviceInfo)).await.unwrap();
    }

    #[tokio::test]
    async fn clear_drops_buffered_state() {
        let link = Arc::new(FakeLink::new());
        link.notify(UUID_COMMON_GET, status_frame(0));
        link.notify(UUID_COMMON_GET, status_frame(1));
        let mut stream = open_stream(&link).await;
        stream.read(SHORT).await.unwrap();

        stream.clear();
        assert!(matches!(
            stream.read(SHORT).await,
            Err(BlackbirdError::Timeout)
        ));
    }
}
