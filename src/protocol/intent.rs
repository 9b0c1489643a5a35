//! Subscription intents
//!
//! An intent is one segment: an action byte followed by a topic prefix.
//! The proxy forwards the raw bytes untouched; this type only exists to
//! build intents on the consumer side and to inspect them for logging and
//! subscription bookkeeping.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::{ACTION_SUBSCRIBE, ACTION_UNSUBSCRIBE};
use super::frame::Frame;

/// Subscribe or unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Action {
    /// Wire flag for this action
    pub fn flag(self) -> u8 {
        match self {
            Action::Subscribe => ACTION_SUBSCRIBE,
            Action::Unsubscribe => ACTION_UNSUBSCRIBE,
        }
    }

    /// Short label used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Subscribe => "SUB",
            Action::Unsubscribe => "UNSUB",
        }
    }
}

/// A decoded subscription intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionIntent {
    /// Requested action
    pub action: Action,
    /// Topic prefix (empty matches every topic)
    pub prefix: Bytes,
}

impl SubscriptionIntent {
    /// Subscribe to `prefix`
    pub fn subscribe(prefix: impl Into<Bytes>) -> Self {
        Self {
            action: Action::Subscribe,
            prefix: prefix.into(),
        }
    }

    /// Unsubscribe from `prefix`
    pub fn unsubscribe(prefix: impl Into<Bytes>) -> Self {
        Self {
            action: Action::Unsubscribe,
            prefix: prefix.into(),
        }
    }

    /// Parse an intent segment
    ///
    /// Returns `None` for an empty segment or when the first byte is not a
    /// known action flag. Such messages are still forwarded upstream, they
    /// just carry no subscription change.
    pub fn parse(segment: &Bytes) -> Option<Self> {
        let action = match *segment.first()? {
            ACTION_SUBSCRIBE => Action::Subscribe,
            ACTION_UNSUBSCRIBE => Action::Unsubscribe,
            _ => return None,
        };
        Some(Self {
            action,
            prefix: segment.slice(1..),
        })
    }

    /// Parse the first segment of an intent message
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        frame.segment(0).and_then(Self::parse)
    }

    /// Encode as a single segment
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.prefix.len());
        buf.put_u8(self.action.flag());
        buf.put_slice(&self.prefix);
        buf.freeze()
    }

    /// Encode as a one-segment message
    pub fn to_frame(&self) -> Frame {
        Frame::from_segments(vec![self.encode()])
    }

    /// Prefix rendered lossily for logs
    pub fn prefix_lossy(&self) -> String {
        String::from_utf8_lossy(&self.prefix).into_owned()
    }
}
