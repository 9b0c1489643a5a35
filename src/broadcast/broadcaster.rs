//! Single-slot latest-value broadcaster
//!
//! The slot lives in a `tokio::sync::watch` channel: one lock guards the
//! value, `publish` swaps it and wakes every waiter, and each receiver only
//! remembers which version it last saw. There is no per-consumer queue, so
//! memory stays O(1) no matter how many cursors exist or how slowly they
//! read; a cursor that falls behind simply skips to the newest frame.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::watch;

use super::metadata::FrameMetadata;

/// Default interval at which an idle cursor wakes to re-check its state
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// One published frame
#[derive(Debug, Clone, PartialEq)]
pub struct Latest {
    /// Sequence number assigned by `publish`, starting at 1
    pub seq: u64,
    /// Opaque payload
    pub frame: Bytes,
    /// Metadata published with the payload
    pub metadata: FrameMetadata,
}

#[derive(Debug, Default)]
struct Slot {
    seq: u64,
    latest: Option<Arc<Latest>>,
}

/// Latest-value broadcaster
///
/// Share it behind an `Arc`; `publish` is meant to be called from a single
/// feeder task, but concurrent publishers still get strictly increasing
/// sequence numbers.
#[derive(Debug)]
pub struct Broadcaster {
    tx: watch::Sender<Slot>,
    poll_timeout: Duration,
}

impl Broadcaster {
    /// Create an empty broadcaster
    pub fn new() -> Self {
        Self::with_poll_timeout(DEFAULT_POLL_TIMEOUT)
    }

    /// Create an empty broadcaster whose cursors wake at least every `poll_timeout`
    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        let (tx, _) = watch::channel(Slot::default());
        Self { tx, poll_timeout }
    }

    /// Replace the stored frame and wake every waiting cursor
    ///
    /// Never waits for consumers. Returns the new sequence number.
    pub fn publish(&self, frame: Bytes, metadata: FrameMetadata) -> u64 {
        let mut published = 0;
        self.tx.send_modify(|slot| {
            slot.seq += 1;
            published = slot.seq;
            slot.latest = Some(Arc::new(Latest {
                seq: slot.seq,
                frame,
                metadata,
            }));
        });
        published
    }

    /// Create a cursor positioned at the current frame
    ///
    /// The first item the cursor yields is the next frame published after
    /// this call; frames published earlier are never replayed.
    pub fn subscribe(&self) -> Cursor {
        let rx = self.tx.subscribe();
        let last_seen = rx.borrow().seq;
        Cursor {
            rx,
            last_seen,
            poll_timeout: self.poll_timeout,
        }
    }

    /// Current frame, or `None` if nothing has been published yet
    pub fn snapshot(&self) -> Option<Arc<Latest>> {
        self.tx.borrow().latest.clone()
    }

    /// Sequence number of the current frame (0 before the first publish)
    pub fn sequence(&self) -> u64 {
        self.tx.borrow().seq
    }

    /// Number of live cursors
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-consumer position in a `Broadcaster`
///
/// Holds no lock while idle. Dropping the cursor unregisters it.
#[derive(Debug)]
pub struct Cursor {
    rx: watch::Receiver<Slot>,
    last_seen: u64,
    poll_timeout: Duration,
}

impl Cursor {
    /// Wait for a frame newer than the last one this cursor yielded
    ///
    /// If several frames were published since the last call only the newest
    /// is returned. Returns `None` once the broadcaster is dropped. Cancel
    /// safe: dropping the future loses nothing.
    pub async fn next(&mut self) -> Option<Arc<Latest>> {
        loop {
            if let Some(latest) = self.take_newer() {
                return Some(latest);
            }

            match tokio::time::timeout(self.poll_timeout, self.rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return self.take_newer(),
                Err(_) => {
                    tracing::trace!(last_seen = self.last_seen, "Cursor idle");
                }
            }
        }
    }

    fn take_newer(&mut self) -> Option<Arc<Latest>> {
        let slot = self.rx.borrow_and_update();
        match slot.latest {
            Some(ref latest) if latest.seq != self.last_seen => {
                self.last_seen = latest.seq;
                Some(Arc::clone(latest))
            }
            _ => None,
        }
    }

    /// Sequence number of the last frame yielded (or the position at creation)
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Turn the cursor into a `Stream` of frames
    pub fn into_stream(self) -> impl Stream<Item = Arc<Latest>> + Send + 'static {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|latest| (latest, cursor))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn meta(id: u64) -> FrameMetadata {
        FrameMetadata {
            frame_id: Some(id),
            ..Default::default()
        }
    }

    fn frame(id: u64) -> Bytes {
        Bytes::from(format!("frame-{}", id))
    }

    #[test]
    fn test_snapshot_before_publish() {
        let broadcaster = Broadcaster::new();

        assert!(broadcaster.snapshot().is_none());
        assert_eq!(broadcaster.sequence(), 0);
    }

    #[test]
    fn test_publish_increments_sequence() {
        let broadcaster = Broadcaster::new();

        assert_eq!(broadcaster.publish(frame(1), meta(1)), 1);
        assert_eq!(broadcaster.publish(frame(2), meta(2)), 2);

        let latest = broadcaster.snapshot().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.frame, frame(2));
        assert_eq!(latest.metadata.frame_id, Some(2));
    }

    #[tokio::test]
    async fn test_reader_sees_only_newest() {
        let broadcaster = Broadcaster::new();
        let mut cursor = broadcaster.subscribe();

        for i in 1..=10 {
            broadcaster.publish(frame(i), meta(i));
        }

        let latest = cursor.next().await.unwrap();
        assert_eq!(latest.seq, 10);
        assert_eq!(latest.frame, frame(10));
    }

    #[tokio::test]
    async fn test_late_cursor_does_not_replay() {
        let broadcaster = Broadcaster::new();
        for i in 1..=3 {
            broadcaster.publish(frame(i), meta(i));
        }

        let mut cursor = broadcaster.subscribe();
        assert_eq!(cursor.last_seen(), 3);

        let waited = tokio::time::timeout(Duration::from_millis(50), cursor.next()).await;
        assert!(waited.is_err(), "cursor replayed an old frame");

        broadcaster.publish(frame(4), meta(4));
        let latest = cursor.next().await.unwrap();
        assert_eq!(latest.seq, 4);
        assert_eq!(latest.frame, frame(4));
    }

    #[tokio::test]
    async fn test_next_pending_until_publish() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(frame(1), meta(1));
        let mut cursor = broadcaster.subscribe();

        let mut next = tokio_test::task::spawn(cursor.next());
        tokio_test::assert_pending!(next.poll());

        broadcaster.publish(frame(2), meta(2));
        assert!(next.is_woken());

        let latest = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(latest.seq, 2);
    }

    #[tokio::test]
    async fn test_concurrent_cursors_agree_on_final_frame() {
        let broadcaster = Arc::new(Broadcaster::new());
        const LAST: u64 = 200;

        let mut readers = Vec::new();
        for _ in 0..2 {
            let mut cursor = broadcaster.subscribe();
            readers.push(tokio::spawn(async move {
                let mut previous = 0;
                loop {
                    let latest = cursor.next().await.unwrap();
                    assert!(latest.seq > previous, "sequence went backwards");
                    previous = latest.seq;
                    if latest.seq == LAST {
                        return latest;
                    }
                }
            }));
        }

        for i in 1..=LAST {
            broadcaster.publish(frame(i), meta(i));
            if i % 16 == 0 {
                tokio::task::yield_now().await;
            }
        }

        for reader in readers {
            let last = reader.await.unwrap();
            assert_eq!(last.frame, frame(LAST));
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_wait_releases_registration() {
        let broadcaster = Arc::new(Broadcaster::new());
        let before = broadcaster.subscriber_count();

        let mut cursor = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), before + 1);

        let waiter = tokio::spawn(async move { cursor.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(broadcaster.subscriber_count(), before);
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_waiting() {
        let broadcaster = Arc::new(Broadcaster::with_poll_timeout(Duration::from_millis(10)));
        let mut cursor = broadcaster.subscribe();

        let publisher = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            publisher.publish(frame(1), meta(1));
        });

        let latest = cursor.next().await.unwrap();
        assert_eq!(latest.seq, 1);
    }

    #[tokio::test]
    async fn test_many_cursors_woken_by_one_publish() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut readers = Vec::new();
        for _ in 0..300 {
            let mut cursor = broadcaster.subscribe();
            readers.push(tokio::spawn(async move { cursor.next().await.map(|l| l.seq) }));
        }
        assert_eq!(broadcaster.subscriber_count(), 300);

        tokio::task::yield_now().await;
        broadcaster.publish(frame(1), meta(1));

        for reader in readers {
            assert_eq!(reader.await.unwrap(), Some(1));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cursor_ends_when_broadcaster_dropped() {
        let broadcaster = Broadcaster::new();
        let mut cursor = broadcaster.subscribe();
        drop(broadcaster);

        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let broadcaster = Arc::new(Broadcaster::new());
        let stream = broadcaster.subscribe().into_stream();
        tokio::pin!(stream);

        broadcaster.publish(frame(1), meta(1));
        assert_eq!(stream.next().await.unwrap().seq, 1);

        broadcaster.publish(frame(2), meta(2));
        broadcaster.publish(frame(3), meta(3));
        assert_eq!(stream.next().await.unwrap().seq, 3);
    }
}
