//! Bus clients
//!
//! Provides the two ends that attach to a bus proxy:
//! - `Producer`: connects to the ingress side, sends data frames and sees the
//!   subscription interest forwarded upstream
//! - `Consumer`: connects to the egress side, subscribes by topic prefix and
//!   receives matching frames

pub mod consumer;
pub mod producer;

pub use consumer::Consumer;
pub use producer::Producer;
