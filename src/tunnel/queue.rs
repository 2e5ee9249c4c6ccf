//! Bounded chunk queue backing the streaming upload body
//!
//! Writers hold a [`FrameSender`]; the upload leg owns the [`FrameQueue`].
//! Chunks leave the queue in the order they were appended. A
//! [`QueueEvent::ForceClose`] ends the body of the current upload exchange
//! without closing the queue itself.

use super::TunnelError;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::sync::mpsc;
use tracing::trace;

/// Maximum number of chunks waiting in a queue before `append` blocks
pub const QUEUE_CAPACITY: usize = 100;

/// An item travelling through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Payload bytes
    Data(Bytes),
    /// End the current upload body
    ForceClose,
}

/// Create a queue holding at most `capacity` pending events
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FrameSender { tx },
        FrameQueue {
            rx,
            carry: BytesMut::new(),
        },
    )
}

/// Producer side of a [`FrameQueue`]
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<QueueEvent>,
}

impl FrameSender {
    /// Enqueue a chunk, waiting while the queue is full
    pub async fn append(&self, chunk: Bytes) -> Result<(), TunnelError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(QueueEvent::Data(chunk))
            .await
            .map_err(|_| TunnelError::Closed)
    }

    /// Enqueue the close sentinel
    pub async fn force_close(&self) -> Result<(), TunnelError> {
        self.tx
            .send(QueueEvent::ForceClose)
            .await
            .map_err(|_| TunnelError::Closed)
    }

    /// Number of events waiting to be consumed
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side: a readable, order-preserving byte stream
#[derive(Debug)]
pub struct FrameQueue {
    rx: mpsc::Receiver<QueueEvent>,
    /// Bytes already dequeued but not yet handed out
    carry: BytesMut,
}

impl FrameQueue {
    /// Place `chunk` ahead of every byte not yet read
    pub fn prepend(&mut self, chunk: &[u8]) {
        let mut joined = BytesMut::with_capacity(chunk.len() + self.carry.len());
        joined.extend_from_slice(chunk);
        joined.extend_from_slice(&self.carry);
        self.carry = joined;
    }

    /// Bytes held back from a previous partial read or prepend
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Drop up to `n` bytes from the front of the carried-over bytes
    pub(crate) fn discard(&mut self, n: usize) {
        let n = n.min(self.carry.len());
        self.carry.advance(n);
    }

    /// Read into `buf`
    ///
    /// Waits for a chunk. Returns `Ok(0)` once per close sentinel, after any
    /// carried-over bytes have been read. When every sender is gone the
    /// queue reads as permanently ended.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.carry.is_empty() {
            match self.next_chunk().await {
                Some(chunk) => self.carry.extend_from_slice(&chunk),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.carry.len());
        buf[..n].copy_from_slice(&self.carry[..n]);
        self.carry.advance(n);
        Ok(n)
    }

    /// Next run of bytes, or `None` at a close sentinel or closed queue
    ///
    /// Cancel safe: dropping the future never loses a dequeued chunk.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if !self.carry.is_empty() {
            return Some(self.carry.split().freeze());
        }
        loop {
            match self.rx.recv().await? {
                QueueEvent::Data(chunk) if chunk.is_empty() => continue,
                QueueEvent::Data(chunk) => return Some(chunk),
                QueueEvent::ForceClose => return None,
            }
        }
    }

    /// Wait until at least one byte is ready to send
    ///
    /// Close sentinels seen while idle belong to an upload that has already
    /// ended and are dropped. Returns `false` once every sender is gone.
    pub async fn wait_for_data(&mut self) -> bool {
        while self.carry.is_empty() {
            match self.rx.recv().await {
                Some(QueueEvent::Data(chunk)) => self.carry.extend_from_slice(&chunk),
                Some(QueueEvent::ForceClose) => trace!("dropping stale force-close on idle queue"),
                None => return false,
            }
        }
        true
    }

    /// Stop accepting new chunks; already queued events can still be read
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all_until_eof(queue: &mut FrameQueue, step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            let n = queue.read(&mut buf).await.unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_order_preserved_across_small_reads() {
        let chunks: [&[u8]; 4] = [b"alpha", b"", b"be", b"gamma-delta"];

        for step in [1, 2, 3, 7, 64] {
            let (tx, mut queue) = frame_queue(QUEUE_CAPACITY);
            for chunk in chunks {
                tx.append(Bytes::copy_from_slice(chunk)).await.unwrap();
            }
            tx.force_close().await.unwrap();

            let out = read_all_until_eof(&mut queue, step).await;
            assert_eq!(out, b"alphabegamma-delta", "step {}", step);
        }
    }

    #[tokio::test]
    async fn test_eof_exactly_once_with_pending_carry() {
        let (tx, mut queue) = frame_queue(QUEUE_CAPACITY);
        tx.append(Bytes::from_static(b"abc")).await.unwrap();
        tx.force_close().await.unwrap();
        tx.append(Bytes::from_static(b"d")).await.unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(queue.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(queue.pending(), 1);

        // carried byte first, then the sentinel's single EOF
        assert_eq!(queue.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(queue.read(&mut buf).await.unwrap(), 0);

        // the queue keeps flowing after the sentinel
        assert_eq!(queue.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'd');
    }

    #[tokio::test]
    async fn test_prepend_is_read_first() {
        let (tx, mut queue) = frame_queue(QUEUE_CAPACITY);
        tx.append(Bytes::from_static(b"payload")).await.unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(queue.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"pay");

        queue.prepend(b"AUTH");
        tx.force_close().await.unwrap();

        let out = read_all_until_eof(&mut queue, 5).await;
        assert_eq!(out, b"AUTHload");
    }

    #[tokio::test]
    async fn test_append_blocks_when_full() {
        let (tx, mut queue) = frame_queue(2);
        tx.append(Bytes::from_static(b"1")).await.unwrap();
        tx.append(Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(tx.queued(), 2);

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            tx.append(Bytes::from_static(b"3")),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(queue.next_chunk().await.unwrap(), Bytes::from_static(b"1"));
        tx.append(Bytes::from_static(b"3")).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_data_skips_stale_sentinel() {
        let (tx, mut queue) = frame_queue(QUEUE_CAPACITY);
        tx.force_close().await.unwrap();
        tx.append(Bytes::from_static(b"x")).await.unwrap();

        assert!(queue.wait_for_data().await);
        assert_eq!(queue.next_chunk().await.unwrap(), Bytes::from_static(b"x"));

        drop(tx);
        assert!(!queue.wait_for_data().await);
    }

    #[tokio::test]
    async fn test_close_rejects_new_chunks() {
        let (tx, mut queue) = frame_queue(QUEUE_CAPACITY);
        tx.append(Bytes::from_static(b"kept")).await.unwrap();
        queue.close();

        assert!(matches!(
            tx.append(Bytes::from_static(b"late")).await,
            Err(TunnelError::Closed)
        ));
        assert_eq!(queue.next_chunk().await.unwrap(), Bytes::from_static(b"kept"));
        assert!(queue.next_chunk().await.is_none());
    }
}
