//! Frame bus wire protocol
//!
//! Every message on the bus is an ordered list of opaque byte segments:
//!
//! ```text
//! +-----------+----------+-----------+----------+-----------+-----
//! | count:u16 | len0:u32 | segment 0 | len1:u32 | segment 1 | ...
//! +-----------+----------+-----------+----------+-----------+-----
//! ```
//!
//! Data frames flow producer -> proxy -> consumer with the topic in segment 0.
//! Subscription intents flow the other way as single-segment messages whose
//! first byte is the action flag, followed by the topic prefix.

pub mod codec;
pub mod constants;
pub mod frame;
pub mod intent;

pub use codec::FrameCodec;
pub use frame::Frame;
pub use intent::{Action, SubscriptionIntent};
