//! Bus proxy configuration

use clap::Args;

use crate::protocol::constants::{
    DEFAULT_EGRESS_PORT, DEFAULT_INGRESS_PORT, DEFAULT_MAX_SEGMENTS, DEFAULT_MAX_SEGMENT_SIZE,
};
use crate::protocol::FrameCodec;

/// Bus proxy configuration options
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address producers connect to (`host:port`)
    pub ingress_addr: String,

    /// Address consumers connect to (`host:port`)
    pub egress_addr: String,

    /// Log decoded subscribe/unsubscribe intents (never changes forwarding)
    pub verbose: bool,

    /// Per-consumer outbound queue length; newer frames are dropped when full
    pub send_hwm: usize,

    /// Capacity of the channel from producer connections into the loop
    pub ingress_queue: usize,

    /// Capacity of the channel from consumer connections into the loop
    pub egress_queue: usize,

    /// Maximum segments per message
    pub max_segments: usize,

    /// Maximum bytes per segment
    pub max_segment_size: usize,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ingress_addr: format!("0.0.0.0:{}", DEFAULT_INGRESS_PORT),
            egress_addr: format!("0.0.0.0:{}", DEFAULT_EGRESS_PORT),
            verbose: false,
            send_hwm: 1000,
            ingress_queue: 1024,
            egress_queue: 1024,
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ProxyConfig {
    /// Create a config with explicit ingress and egress addresses
    pub fn new(ingress_addr: impl Into<String>, egress_addr: impl Into<String>) -> Self {
        Self {
            ingress_addr: ingress_addr.into(),
            egress_addr: egress_addr.into(),
            ..Default::default()
        }
    }

    /// Set the ingress address
    pub fn ingress(mut self, addr: impl Into<String>) -> Self {
        self.ingress_addr = addr.into();
        self
    }

    /// Set the egress address
    pub fn egress(mut self, addr: impl Into<String>) -> Self {
        self.egress_addr = addr.into();
        self
    }

    /// Enable or disable subscription audit logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the per-consumer queue length (at least 1)
    pub fn send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm.max(1);
        self
    }

    /// Set wire limits
    pub fn limits(mut self, max_segments: usize, max_segment_size: usize) -> Self {
        self.max_segments = max_segments;
        self.max_segment_size = max_segment_size;
        self
    }

    /// Codec configured with this config's wire limits
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::with_limits(self.max_segments, self.max_segment_size)
    }
}

/// Proxy options from the command line or the environment
///
/// Flatten into a binary's `clap::Parser` and convert with `ProxyConfig::from`.
#[derive(Debug, Clone, Args)]
pub struct ProxyArgs {
    /// Host both endpoints bind to
    #[arg(long, env = "BROKER_BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: String,

    /// Port producers connect to
    #[arg(
        long,
        env = "PUB_PORT",
        default_value_t = DEFAULT_INGRESS_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub pub_port: u16,

    /// Port consumers connect to
    #[arg(
        long,
        env = "SUB_PORT",
        default_value_t = DEFAULT_EGRESS_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub sub_port: u16,

    /// Log every subscribe and unsubscribe
    #[arg(long, env = "XPUB_VERBOSE")]
    pub verbose: bool,

    /// Per-consumer queue length before frames are dropped
    #[arg(
        long,
        env = "SEND_HWM",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub send_hwm: u64,
}

impl From<ProxyArgs> for ProxyConfig {
    fn from(args: ProxyArgs) -> Self {
        ProxyConfig::new(
            format!("{}:{}", args.bind_host, args.pub_port),
            format!("{}:{}", args.bind_host, args.sub_port),
        )
        .verbose(args.verbose)
        .send_hwm(usize::try_from(args.send_hwm).unwrap_or(usize::MAX))
    }
}
