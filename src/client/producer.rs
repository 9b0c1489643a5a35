//! Bus producer
//!
//! Attaches to the ingress side of a bus proxy. Frames are written in the
//! order `send` is called. Intents forwarded by the proxy are tracked in the
//! background so the producer can tell whether anyone currently wants a
//! topic.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bus::SubscriptionSet;
use crate::error::Result;
use crate::protocol::{Frame, FrameCodec, SubscriptionIntent};

/// Intents buffered for `next_intent` before new ones are discarded
const INTENT_BUFFER: usize = 256;

/// Producer connection to a bus proxy
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use framebus::client::Producer;
/// use framebus::protocol::Frame;
///
/// # async fn example() -> framebus::error::Result<()> {
/// let mut producer = Producer::connect("127.0.0.1:5555").await?;
///
/// let meta = r#"{"frame_id":0,"encoding":"jpeg"}"#;
/// producer
///     .send(Frame::data("processed", meta, Bytes::from_static(b"\xff\xd8\xff")))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Producer {
    sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
    intents: mpsc::Receiver<SubscriptionIntent>,
    interest: Arc<Mutex<SubscriptionSet>>,
    reader: JoinHandle<()>,
}

impl Producer {
    /// Connect with default wire limits
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with(addr, FrameCodec::new()).await
    }

    /// Connect with a specific codec
    pub async fn connect_with<A: ToSocketAddrs>(addr: A, codec: FrameCodec) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        let (read_half, write_half) = socket.into_split();

        let (tx, rx) = mpsc::channel(INTENT_BUFFER);
        let interest = Arc::new(Mutex::new(SubscriptionSet::new()));
        let tracked = Arc::clone(&interest);

        let reader = tokio::spawn(async move {
            let mut source = FramedRead::new(read_half, codec);
            while let Some(item) = source.next().await {
                let frame = match item {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(error = %e, "Producer read failed");
                        break;
                    }
                };
                let Some(intent) = SubscriptionIntent::from_frame(&frame) else {
                    continue;
                };

                tracked.lock().await.apply(&intent);
                // Interest stays accurate even if nobody drains `next_intent`
                let _ = tx.try_send(intent);
            }
        });

        Ok(Self {
            sink: FramedWrite::new(write_half, codec),
            intents: rx,
            interest,
            reader,
        })
    }

    /// Send one frame
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        self.sink.send(frame).await
    }

    /// Next intent forwarded by the proxy; `None` once the connection closes
    pub async fn next_intent(&mut self) -> Option<SubscriptionIntent> {
        self.intents.recv().await
    }

    /// Whether any consumer currently subscribes to a prefix of `topic`
    pub async fn has_interest(&self, topic: &[u8]) -> bool {
        self.interest.lock().await.matches(topic)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
