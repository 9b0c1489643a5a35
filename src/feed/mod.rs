//! Bus-to-broadcaster feed
//!
//! A single task that consumes one topic from the proxy egress and publishes
//! every frame into a `Broadcaster`. Each bus frame must have the layout
//! `[topic, metadata_json, payload]`; anything else is counted and skipped.
//! The connection is re-established whenever it drops.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, FrameMetadata};
use crate::client::Consumer;
use crate::error::{ProtocolError, Result};
use crate::protocol::constants::DEFAULT_EGRESS_PORT;
use crate::protocol::{Frame, FrameCodec};
use crate::stats::FeedStats;

/// Feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Proxy egress address, `host:port`
    pub endpoint: String,

    /// Topic prefix to subscribe to
    pub topic: Bytes,

    /// Delay before reconnecting after the connection fails
    pub reconnect_interval: Duration,

    /// How long the connection may stay silent before an idle notice is logged
    pub poll_timeout: Duration,

    /// Wire limits
    pub codec: FrameCodec,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("broker:{}", DEFAULT_EGRESS_PORT),
            topic: Bytes::from_static(b"processed"),
            reconnect_interval: Duration::from_millis(100),
            poll_timeout: Duration::from_secs(2),
            codec: FrameCodec::new(),
        }
    }
}

impl FeedConfig {
    /// Feed from `endpoint` on `topic`
    pub fn new(endpoint: impl Into<String>, topic: impl Into<Bytes>) -> Self {
        Self {
            endpoint: endpoint.into(),
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Set the reconnect delay
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the idle notice interval
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

/// Feed options from the command line or the environment
#[derive(Debug, Clone, Args)]
pub struct FeedArgs {
    /// Proxy host to consume from
    #[arg(long, env = "BROKER_HOST", default_value = "broker")]
    pub broker_host: String,

    /// Proxy port consumers connect to
    #[arg(
        long,
        env = "SUB_PORT",
        default_value_t = DEFAULT_EGRESS_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub sub_port: u16,

    /// Topic prefix to subscribe to
    #[arg(long, env = "SUB_TOPIC", default_value = "processed")]
    pub sub_topic: String,
}

impl From<FeedArgs> for FeedConfig {
    fn from(args: FeedArgs) -> Self {
        FeedConfig::new(
            format!("{}:{}", args.broker_host, args.sub_port),
            args.sub_topic,
        )
    }
}

/// Why a connection pump returned
enum PumpExit {
    Shutdown,
    Disconnected,
}

/// Consumes the bus and feeds a broadcaster
pub struct FrameFeed {
    config: FeedConfig,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<FeedStats>,
}

impl FrameFeed {
    /// Create a feed into `broadcaster`
    pub fn new(config: FeedConfig, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            config,
            broadcaster,
            stats: Arc::new(FeedStats::new()),
        }
    }

    /// Feed metrics
    pub fn stats(&self) -> &Arc<FeedStats> {
        &self.stats
    }

    /// The broadcaster frames are published into
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Run until `shutdown` is cancelled, reconnecting as needed
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        let topic = String::from_utf8_lossy(&self.config.topic).into_owned();

        loop {
            let connect = Consumer::connect_with(self.config.endpoint.as_str(), self.config.codec);
            let connected = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = connect => result,
            };

            let exit = match connected {
                Ok(mut consumer) => match consumer.subscribe(self.config.topic.clone()).await {
                    Ok(()) => {
                        self.stats.connects.inc();
                        tracing::info!(endpoint = %self.config.endpoint, topic = %topic, "Feed subscribed");
                        self.pump(&mut consumer, &shutdown).await
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %self.config.endpoint, error = %e, "Feed subscribe failed");
                        PumpExit::Disconnected
                    }
                },
                Err(e) => {
                    tracing::debug!(endpoint = %self.config.endpoint, error = %e, "Feed connect failed");
                    PumpExit::Disconnected
                }
            };

            if let PumpExit::Shutdown = exit {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
        }
    }

    async fn pump(&self, consumer: &mut Consumer, shutdown: &CancellationToken) -> PumpExit {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return PumpExit::Shutdown,
                received = tokio::time::timeout(self.config.poll_timeout, consumer.recv()) => received,
            };

            match received {
                Ok(Ok(Some(frame))) => {
                    if let Err(e) = self.ingest(&frame) {
                        tracing::warn!(error = %e, segments = frame.len(), "Skipping frame");
                    }
                }
                Ok(Ok(None)) => {
                    tracing::warn!(endpoint = %self.config.endpoint, "Feed connection closed");
                    return PumpExit::Disconnected;
                }
                Ok(Err(e)) => {
                    tracing::warn!(endpoint = %self.config.endpoint, error = %e, "Feed connection failed");
                    return PumpExit::Disconnected;
                }
                Err(_) => {
                    tracing::debug!(
                        published = self.stats.published.get(),
                        "No frames within poll timeout"
                    );
                }
            }
        }
    }

    /// Decode one bus frame and publish it
    ///
    /// Returns the broadcaster sequence number assigned to the frame.
    pub fn ingest(&self, frame: &Frame) -> Result<u64> {
        self.stats.frames_in.inc();

        let (metadata, payload) = match decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.decode_errors.inc();
                return Err(e);
            }
        };
        self.stats.bytes_in.add(payload.len() as u64);

        if let Some(ts_capture) = metadata.ts_capture {
            if let Some(latency) = since_epoch_secs(ts_capture) {
                self.stats.e2e_latency.observe(latency);
            }
        }

        let frame_id = metadata.frame_id;
        let seq = self.broadcaster.publish(payload, metadata);
        self.stats.published.inc();
        tracing::trace!(seq, frame_id, "Published frame");
        Ok(seq)
    }
}

fn decode(frame: &Frame) -> Result<(FrameMetadata, Bytes)> {
    match frame.segments() {
        [_topic, header, payload] => Ok((FrameMetadata::from_json(header)?, payload.clone())),
        segments => Err(ProtocolError::UnexpectedLayout(format!(
            "expected [topic, metadata, payload], got {} segments",
            segments.len()
        ))
        .into()),
    }
}

/// Time elapsed since `ts` (seconds since the Unix epoch), if it is in the past
fn since_epoch_secs(ts: f64) -> Option<Duration> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
    let elapsed = now - ts;
    if elapsed.is_finite() && elapsed >= 0.0 {
        Some(Duration::from_secs_f64(elapsed))
    } else {
        None
    }
}
