//! framebus: a topic-filtered frame bus with a latest-value broadcaster
//!
//! Two building blocks for live media pipelines:
//!
//! - [`bus`]: a proxy that sits between producers and consumers. Producers
//!   publish multi-segment frames tagged with a topic; consumers subscribe
//!   by topic prefix. The proxy forwards matching frames downstream and
//!   forwards subscription intents upstream so producers know who is
//!   listening. Slow consumers lose frames instead of stalling the bus.
//!
//! - [`broadcast`]: a single-slot store holding only the newest frame. Any
//!   number of readers wait on it and always wake with the latest value,
//!   which is what an MJPEG viewer wants.
//!
//! [`feed`] connects the two and [`http`] serves a broadcaster to browsers.
//!
//! # Example
//!
//! ```no_run
//! use framebus::bus::{BusProxy, ProxyConfig};
//!
//! #[tokio::main]
//! async fn main() -> framebus::error::Result<()> {
//!     let config = ProxyConfig::new("0.0.0.0:5555", "0.0.0.0:5556").verbose(true);
//!     let proxy = BusProxy::bind(config).await?;
//!
//!     proxy.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```

pub mod broadcast;
pub mod bus;
pub mod client;
pub mod error;
pub mod feed;
pub mod http;
pub mod protocol;
pub mod stats;

pub use broadcast::{Broadcaster, Cursor, FrameMetadata, Latest};
pub use bus::{BusProxy, ProxyArgs, ProxyConfig, ProxyHandle};
pub use client::{Consumer, Producer};
pub use error::{Error, Result};
pub use feed::{FeedArgs, FeedConfig, FrameFeed};
pub use protocol::Frame;
