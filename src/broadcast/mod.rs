//! Latest-value broadcasting
//!
//! A `Broadcaster` keeps exactly one frame: the newest. Any number of
//! `Cursor`s wait on it and each wakes with whatever is current, skipping
//! frames it was too slow to see. Producers never block on consumers.

pub mod broadcaster;
pub mod metadata;

pub use broadcaster::{Broadcaster, Cursor, Latest, DEFAULT_POLL_TIMEOUT};
pub use metadata::FrameMetadata;
