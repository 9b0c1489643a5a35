//! Per-connection tasks for the bus proxy
//!
//! Each accepted socket gets one task that concurrently reads messages into
//! its side's event channel and writes whatever the relay loop queues for it.
//! Connection tasks never touch routing state; they only report
//! `Joined`/`Message`/`Left` events, so the relay loop stays the single owner
//! of subscription state and per-side FIFO order falls out of the channel.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Side};
use crate::protocol::{Frame, FrameCodec};
use crate::stats::ProxyStats;

/// Event reported by a side's accept loop or connection tasks
#[derive(Debug)]
pub(crate) enum PeerEvent {
    /// A peer connected; `outbound` feeds its writer
    Joined {
        id: u64,
        addr: SocketAddr,
        outbound: OutboundTx,
    },
    /// A complete message arrived from a peer
    Message { id: u64, frame: Frame },
    /// A peer disconnected
    Left { id: u64 },
    /// The listener itself failed
    Failed(io::Error),
}

/// Result of queueing a message for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    /// Queue at its high-water mark; the message was dropped
    Full,
    /// Peer is gone
    Closed,
}

/// Sending half of a peer's outbound queue
///
/// Consumers get a bounded queue (lossy when full), producers an unbounded
/// one because intents must never be dropped.
#[derive(Debug, Clone)]
pub(crate) enum OutboundTx {
    Bounded(mpsc::Sender<Frame>),
    Unbounded(mpsc::UnboundedSender<Frame>),
}

impl OutboundTx {
    /// Queue without waiting
    pub(crate) fn push(&self, frame: Frame) -> Push {
        match self {
            OutboundTx::Bounded(tx) => match tx.try_send(frame) {
                Ok(()) => Push::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Push::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
            },
            OutboundTx::Unbounded(tx) => match tx.send(frame) {
                Ok(()) => Push::Queued,
                Err(_) => Push::Closed,
            },
        }
    }
}

/// Receiving half of a peer's outbound queue
#[derive(Debug)]
pub(crate) enum OutboundRx {
    Bounded(mpsc::Receiver<Frame>),
    Unbounded(mpsc::UnboundedReceiver<Frame>),
}

impl OutboundRx {
    pub(crate) async fn recv(&mut self) -> Option<Frame> {
        match self {
            OutboundRx::Bounded(rx) => rx.recv().await,
            OutboundRx::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Create the outbound queue for a peer on `side`
pub(crate) fn outbound(side: Side, send_hwm: usize) -> (OutboundTx, OutboundRx) {
    match side {
        Side::Ingress => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutboundTx::Unbounded(tx), OutboundRx::Unbounded(rx))
        }
        Side::Egress => {
            let (tx, rx) = mpsc::channel(send_hwm.max(1));
            (OutboundTx::Bounded(tx), OutboundRx::Bounded(rx))
        }
    }
}

/// Shared state for one side's accept loop
#[derive(Clone)]
pub(crate) struct AcceptContext {
    pub side: Side,
    pub codec: FrameCodec,
    pub send_hwm: usize,
    pub tcp_nodelay: bool,
    pub events: mpsc::Sender<PeerEvent>,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
    pub stats: Arc<ProxyStats>,
}

/// Accept peers until cancelled or the listener fails
pub(crate) async fn accept_loop(listener: TcpListener, ctx: AcceptContext) {
    let mut next_id: u64 = 1;

    loop {
        let accepted = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer_addr)) => {
                let id = next_id;
                next_id += 1;

                if ctx.tcp_nodelay {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!(side = %ctx.side, peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                }

                let (outbound_tx, outbound_rx) = outbound(ctx.side, ctx.send_hwm);
                let joined = PeerEvent::Joined {
                    id,
                    addr: peer_addr,
                    outbound: outbound_tx,
                };
                // Joined must be queued before the connection can emit messages
                if ctx.events.send(joined).await.is_err() {
                    return;
                }

                tracing::debug!(side = %ctx.side, peer_id = id, peer = %peer_addr, "Peer connected");

                let conn = ctx.clone();
                ctx.tracker.spawn(async move {
                    run_connection(id, socket, outbound_rx, conn).await;
                });
            }
            Err(e) if is_transient_accept_error(&e) => {
                tracing::debug!(side = %ctx.side, error = %e, "Transient accept error");
            }
            Err(e) => {
                tracing::error!(side = %ctx.side, error = %e, "Listener failed");
                let _ = ctx.events.send(PeerEvent::Failed(e)).await;
                return;
            }
        }
    }
}

/// Errors that concern only the connection being accepted
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn run_connection(id: u64, socket: TcpStream, mut outbound_rx: OutboundRx, ctx: AcceptContext) {
    let (read_half, write_half) = socket.into_split();
    let mut source = FramedRead::new(read_half, ctx.codec);
    let mut sink = FramedWrite::new(write_half, ctx.codec);

    let reader = async {
        while let Some(item) = source.next().await {
            let frame = item?;
            if ctx.events.send(PeerEvent::Message { id, frame }).await.is_err() {
                break;
            }
        }
        Ok::<(), Error>(())
    };

    let writer = async {
        while let Some(frame) = outbound_rx.recv().await {
            sink.send(frame).await?;
        }
        Ok::<(), Error>(())
    };

    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => Ok(()),
        result = reader => result,
        result = writer => result,
    };

    match outcome {
        Ok(()) => {
            tracing::debug!(side = %ctx.side, peer_id = id, "Peer disconnected");
        }
        Err(Error::Protocol(e)) => {
            ctx.stats.protocol_errors.inc();
            tracing::warn!(side = %ctx.side, peer_id = id, error = %e, "Closing peer after protocol error");
        }
        Err(e) => {
            tracing::debug!(side = %ctx.side, peer_id = id, error = %e, "Peer connection error");
        }
    }

    // The loop may already be gone during shutdown
    let _ = ctx.events.send(PeerEvent::Left { id }).await;
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_bounded_outbound_drops_when_full() {
        let (tx, _rx) = outbound(Side::Egress, 2);
        let frame = Frame::data("t", "m", Bytes::from_static(b"p"));

        assert_eq!(tx.push(frame.clone()), Push::Queued);
        assert_eq!(tx.push(frame.clone()), Push::Queued);
        assert_eq!(tx.push(frame), Push::Full);
    }

    #[test]
    fn test_unbounded_outbound_never_full() {
        let (tx, _rx) = outbound(Side::Ingress, 1);
        for _ in 0..10_000 {
            assert_eq!(tx.push(Frame::empty()), Push::Queued);
        }
    }

    #[test]
    fn test_outbound_closed() {
        let (tx, rx) = outbound(Side::Egress, 4);
        drop(rx);
        assert_eq!(tx.push(Frame::empty()), Push::Closed);
    }

    #[tokio::test]
    async fn test_outbound_preserves_order() {
        let (tx, mut rx) = outbound(Side::Egress, 8);
        for i in 0..5u8 {
            tx.push(Frame::from_segments(vec![Bytes::from(vec![i])]));
        }
        for i in 0..5u8 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.segment(0).unwrap().as_ref(), &[i]);
        }
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_transient_accept_error(&io::Error::other("emfile")));
    }
}
