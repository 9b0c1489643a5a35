//! Bus consumer
//!
//! Attaches to the egress side of a bus proxy. Nothing is delivered until at
//! least one prefix is subscribed; an empty prefix subscribes to everything.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::Result;
use crate::protocol::{Frame, FrameCodec, SubscriptionIntent};

/// Consumer connection to a bus proxy
pub struct Consumer {
    source: FramedRead<OwnedReadHalf, FrameCodec>,
    sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
}

impl Consumer {
    /// Connect with default wire limits
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with(addr, FrameCodec::new()).await
    }

    /// Connect with a specific codec
    pub async fn connect_with<A: ToSocketAddrs>(addr: A, codec: FrameCodec) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        let (read_half, write_half) = socket.into_split();

        Ok(Self {
            source: FramedRead::new(read_half, codec),
            sink: FramedWrite::new(write_half, codec),
        })
    }

    /// Start receiving frames whose topic starts with `prefix`
    pub async fn subscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.send_intent(SubscriptionIntent::subscribe(prefix)).await
    }

    /// Drop one subscription to `prefix`
    pub async fn unsubscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.send_intent(SubscriptionIntent::unsubscribe(prefix)).await
    }

    /// Send a raw message upstream as-is
    pub async fn send_raw(&mut self, frame: Frame) -> Result<()> {
        self.sink.send(frame).await
    }

    async fn send_intent(&mut self, intent: SubscriptionIntent) -> Result<()> {
        self.sink.send(intent.to_frame()).await
    }

    /// Next frame; `Ok(None)` when the proxy closed the connection
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        self.source.next().await.transpose()
    }
}
