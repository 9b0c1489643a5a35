//! Topic-filtered bus proxy
//!
//! The proxy binds two endpoints and relays in both directions:
//!
//! ```text
//!   [Producer]   [Producer]                     [Consumer]   [Consumer]
//!       │  ▲         │  ▲                           ▲  │         ▲  │
//!  frames  intents   │  │                      frames  intents   │  │
//!       ▼  │         ▼  │                           │  ▼         │  ▼
//!   ┌──────────────────────┐   PeerEvent   ┌─────────────────────────┐
//!   │ ingress listener     │──────────────►│        relay loop       │
//!   │  (one task per peer) │◄──────────────│  consumers: {           │
//!   └──────────────────────┘   intents     │    id -> SubscriptionSet│
//!                                          │  }                      │
//!   ┌──────────────────────┐   PeerEvent   │                         │
//!   │ egress listener      │──────────────►│                         │
//!   │  (one task per peer) │◄──────────────│                         │
//!   └──────────────────────┘   frames      └─────────────────────────┘
//! ```
//!
//! Frames are relayed byte-for-byte; only segment 0 is read to match it
//! against each consumer's prefixes. Intents are forwarded verbatim to every
//! producer. The loop never waits on a peer: consumer queues are bounded and
//! drop the newest frame when full, so one slow consumer cannot stall the
//! others.

pub mod config;
pub(crate) mod peer;
pub mod proxy;
pub mod subscriptions;

pub use config::{ProxyArgs, ProxyConfig};
pub use proxy::{BusProxy, ProxyHandle};
pub use subscriptions::SubscriptionSet;
