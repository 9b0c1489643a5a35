//! Multi-segment frames
//!
//! A `Frame` is the unit relayed by the bus. It is immutable once built and
//! cheap to clone: the segment list is shared behind an `Arc`, and each
//! segment is a reference-counted `Bytes`, so fanning one frame out to many
//! consumers never copies payload data.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};

/// An ordered list of opaque byte segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    segments: Arc<[Bytes]>,
}

impl Frame {
    /// Build a frame from its segments
    pub fn from_segments(segments: Vec<Bytes>) -> Self {
        Self {
            segments: segments.into(),
        }
    }

    /// Build the usual `[topic, metadata, payload]` data frame
    pub fn data(topic: impl Into<Bytes>, metadata: impl Into<Bytes>, payload: Bytes) -> Self {
        Self::from_segments(vec![topic.into(), metadata.into(), payload])
    }

    /// A frame with no segments
    ///
    /// Never routable; only useful to exercise malformed-input handling.
    pub fn empty() -> Self {
        Self::from_segments(Vec::new())
    }

    /// All segments in order
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Segment at `index`, if present
    pub fn segment(&self, index: usize) -> Option<&Bytes> {
        self.segments.get(index)
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the frame has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Routing key (segment 0)
    pub fn topic(&self) -> Option<&Bytes> {
        self.segments.first()
    }

    /// Sum of all segment lengths
    pub fn byte_len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        use super::constants::{SEGMENT_COUNT_SIZE, SEGMENT_LEN_SIZE};

        SEGMENT_COUNT_SIZE + self.segments.len() * SEGMENT_LEN_SIZE + self.byte_len()
    }

    /// Check that the frame can be routed
    pub fn ensure_routable(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::MalformedFrame("zero segments"));
        }
        Ok(())
    }
}

impl From<Vec<Bytes>> for Frame {
    fn from(segments: Vec<Bytes>) -> Self {
        Self::from_segments(segments)
    }
}
