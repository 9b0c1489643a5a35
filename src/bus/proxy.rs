//! Bus proxy relay loop
//!
//! One task owns all routing state and multiplexes the two directional
//! pipes: data frames ingress -> egress and subscription intents
//! egress -> ingress. Connection tasks (see `peer`) only feed events in and
//! drain outbound queues.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::ProxyConfig;
use super::peer::{accept_loop, AcceptContext, OutboundTx, PeerEvent, Push};
use super::subscriptions::SubscriptionSet;
use crate::error::{Error, Result, Side};
use crate::protocol::{Frame, SubscriptionIntent};
use crate::stats::ProxyStats;

/// A bound, not yet running, bus proxy
pub struct BusProxy {
    config: ProxyConfig,
    ingress: TcpListener,
    egress: TcpListener,
    stats: Arc<ProxyStats>,
}

impl BusProxy {
    /// Bind both endpoints
    ///
    /// Fails with `Error::Bind` naming the side if either address is in use
    /// or cannot be resolved.
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        let ingress = bind_side(Side::Ingress, &config.ingress_addr).await?;
        let egress = bind_side(Side::Egress, &config.egress_addr).await?;

        Ok(Self {
            config,
            ingress,
            egress,
            stats: Arc::new(ProxyStats::new()),
        })
    }

    /// Bind both endpoints and run the relay loop in a background task
    pub async fn start(config: ProxyConfig) -> Result<ProxyHandle> {
        Ok(Self::bind(config).await?.spawn())
    }

    /// Local address producers connect to
    pub fn ingress_addr(&self) -> Result<SocketAddr> {
        Ok(self.ingress.local_addr()?)
    }

    /// Local address consumers connect to
    pub fn egress_addr(&self) -> Result<SocketAddr> {
        Ok(self.egress.local_addr()?)
    }

    /// Shared metrics, updated by the relay loop
    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }

    /// Run the relay loop in a background task
    pub fn spawn(self) -> ProxyHandle {
        let cancel = CancellationToken::new();
        let ingress_addr = self.ingress.local_addr().ok();
        let egress_addr = self.egress.local_addr().ok();
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(self.run(cancel.clone()));

        ProxyHandle {
            cancel,
            task,
            ingress_addr,
            egress_addr,
            stats,
        }
    }

    /// Run the relay loop until `shutdown` resolves or a fatal error occurs
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let run = self.run(cancel.clone());
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
                run.await
            }
        }
    }

    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let BusProxy {
            config,
            ingress,
            egress,
            stats,
        } = self;

        tracing::info!(
            ingress = %config.ingress_addr,
            egress = %config.egress_addr,
            verbose = config.verbose,
            "Bus proxy running"
        );

        let (ingress_tx, mut ingress_rx) = mpsc::channel(config.ingress_queue.max(1));
        let (egress_tx, mut egress_rx) = mpsc::channel(config.egress_queue.max(1));
        let connections = cancel.child_token();
        let tracker = TaskTracker::new();

        let base = AcceptContext {
            side: Side::Ingress,
            codec: config.codec(),
            send_hwm: config.send_hwm,
            tcp_nodelay: config.tcp_nodelay,
            events: ingress_tx,
            cancel: connections.clone(),
            tracker: tracker.clone(),
            stats: Arc::clone(&stats),
        };
        let egress_ctx = AcceptContext {
            side: Side::Egress,
            events: egress_tx,
            ..base.clone()
        };
        tracker.spawn(accept_loop(ingress, base));
        tracker.spawn(accept_loop(egress, egress_ctx));

        let mut relay = Relay::new(config.verbose, Arc::clone(&stats));

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                event = ingress_rx.recv() => {
                    if let Err(e) = relay.on_ingress(event) {
                        break Err(e);
                    }
                }
                event = egress_rx.recv() => {
                    if let Err(e) = relay.on_egress(event) {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(ref e) = result {
            tracing::error!(error = %e, "Relay loop failed");
        }

        // Dropping the relay closes every outbound queue
        connections.cancel();
        drop(relay);
        drop(ingress_rx);
        drop(egress_rx);
        tracker.close();
        tracker.wait().await;

        tracing::info!("Bus proxy stopped");
        result
    }
}

async fn bind_side(side: Side, addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| Error::Bind {
        side,
        addr: addr.to_string(),
        source,
    })
}

/// Handle to a running bus proxy
pub struct ProxyHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
    ingress_addr: Option<SocketAddr>,
    egress_addr: Option<SocketAddr>,
    stats: Arc<ProxyStats>,
}

impl ProxyHandle {
    /// Ask the relay loop to exit; safe to call more than once
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the relay loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the relay loop and every connection task to finish
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::other(e))),
        }
    }

    /// Stop and wait
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }

    /// Bound ingress address
    pub fn ingress_addr(&self) -> Option<SocketAddr> {
        self.ingress_addr
    }

    /// Bound egress address
    pub fn egress_addr(&self) -> Option<SocketAddr> {
        self.egress_addr
    }

    /// Shared metrics
    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }
}

struct ProducerPeer {
    addr: SocketAddr,
    outbound: OutboundTx,
}

struct ConsumerPeer {
    addr: SocketAddr,
    outbound: OutboundTx,
    subscriptions: SubscriptionSet,
}

/// Routing state owned by the relay loop
struct Relay {
    verbose: bool,
    stats: Arc<ProxyStats>,
    producers: HashMap<u64, ProducerPeer>,
    consumers: HashMap<u64, ConsumerPeer>,
}

impl Relay {
    fn new(verbose: bool, stats: Arc<ProxyStats>) -> Self {
        Self {
            verbose,
            stats,
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    fn on_ingress(&mut self, event: Option<PeerEvent>) -> Result<()> {
        match event {
            Some(PeerEvent::Joined { id, addr, outbound }) => {
                // Late-joining producers learn the interest that already exists
                let mut replayed = 0usize;
                for consumer in self.consumers.values() {
                    for prefix in consumer.subscriptions.held() {
                        outbound.push(SubscriptionIntent::subscribe(prefix.clone()).to_frame());
                        replayed += 1;
                    }
                }
                self.producers.insert(id, ProducerPeer { addr, outbound });
                self.stats.producers.inc();
                tracing::debug!(producer = id, peer = %addr, replayed, "Producer attached");
            }
            Some(PeerEvent::Message { id, frame }) => self.forward_frame(id, frame),
            Some(PeerEvent::Left { id }) => {
                if let Some(producer) = self.producers.remove(&id) {
                    self.stats.producers.dec();
                    tracing::debug!(producer = id, peer = %producer.addr, "Producer detached");
                }
            }
            Some(PeerEvent::Failed(source)) => {
                return Err(Error::RelayIo {
                    side: Side::Ingress,
                    source,
                })
            }
            None => return Err(endpoint_closed(Side::Ingress)),
        }
        Ok(())
    }

    fn on_egress(&mut self, event: Option<PeerEvent>) -> Result<()> {
        match event {
            Some(PeerEvent::Joined { id, addr, outbound }) => {
                self.consumers.insert(
                    id,
                    ConsumerPeer {
                        addr,
                        outbound,
                        subscriptions: SubscriptionSet::new(),
                    },
                );
                self.stats.consumers.inc();
                tracing::debug!(consumer = id, peer = %addr, "Consumer attached");
            }
            Some(PeerEvent::Message { id, frame }) => self.forward_intent(id, frame),
            Some(PeerEvent::Left { id }) => {
                if let Some(mut consumer) = self.consumers.remove(&id) {
                    self.stats.consumers.dec();
                    let held = consumer.subscriptions.drain();
                    tracing::debug!(
                        consumer = id,
                        peer = %consumer.addr,
                        subscriptions = held.len(),
                        "Consumer detached"
                    );
                    for prefix in held {
                        let intent = SubscriptionIntent::unsubscribe(prefix);
                        self.audit(id, &intent);
                        self.forward_upstream(intent.to_frame());
                    }
                }
            }
            Some(PeerEvent::Failed(source)) => {
                return Err(Error::RelayIo {
                    side: Side::Egress,
                    source,
                })
            }
            None => return Err(endpoint_closed(Side::Egress)),
        }
        Ok(())
    }

    /// Relay one data frame to every consumer whose subscriptions match
    fn forward_frame(&mut self, producer: u64, frame: Frame) {
        let started = Instant::now();
        let bytes = frame.byte_len() as u64;
        self.stats.frames_in.inc();
        self.stats.bytes_in.add(bytes);

        if let Err(e) = frame.ensure_routable() {
            self.stats.malformed_frames.inc();
            tracing::warn!(producer, error = %e, "Dropping frame");
            return;
        }

        let mut delivered = 0usize;
        let mut dropped = 0usize;
        if let Some(topic) = frame.topic() {
            for (id, consumer) in &self.consumers {
                if !consumer.subscriptions.matches(topic) {
                    continue;
                }
                match consumer.outbound.push(frame.clone()) {
                    Push::Queued => delivered += 1,
                    Push::Full => {
                        dropped += 1;
                        self.stats.dropped_frames.inc();
                        tracing::trace!(consumer = id, "Consumer queue full, dropping frame");
                    }
                    Push::Closed => {}
                }
            }
        }

        self.stats.frames_out.inc();
        self.stats.bytes_out.add(bytes);
        self.stats.frame_forward_latency.observe(started.elapsed());

        tracing::trace!(
            producer,
            segments = frame.len(),
            bytes,
            delivered,
            dropped,
            "Frame relayed"
        );
    }

    /// Forward one intent upstream, tracking it against the consumer
    fn forward_intent(&mut self, consumer: u64, frame: Frame) {
        let started = Instant::now();
        self.stats.intents_in.inc();
        self.stats.intent_bytes.add(frame.byte_len() as u64);

        if let Err(e) = frame.ensure_routable() {
            self.stats.malformed_frames.inc();
            tracing::warn!(consumer, error = %e, "Dropping intent");
            return;
        }

        if let Some(intent) = SubscriptionIntent::from_frame(&frame) {
            if let Some(peer) = self.consumers.get_mut(&consumer) {
                peer.subscriptions.apply(&intent);
            }
            self.audit(consumer, &intent);
        }

        self.forward_upstream(frame);
        self.stats
            .intent_forward_latency
            .observe(started.elapsed());
    }

    fn forward_upstream(&self, frame: Frame) {
        for producer in self.producers.values() {
            producer.outbound.push(frame.clone());
        }
        self.stats.intents_out.inc();
    }

    fn audit(&self, consumer: u64, intent: &SubscriptionIntent) {
        if self.verbose {
            tracing::info!(
                consumer,
                action = intent.action.as_str(),
                topic = %intent.prefix_lossy(),
                "Subscription change"
            );
        }
    }
}

fn endpoint_closed(side: Side) -> Error {
    Error::RelayIo {
        side,
        source: io::Error::new(io::ErrorKind::BrokenPipe, "endpoint event channel closed"),
    }
}
