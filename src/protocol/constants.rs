//! Wire constants and defaults

/// Action flag byte for a subscribe intent
pub const ACTION_SUBSCRIBE: u8 = 0x01;

/// Action flag byte for an unsubscribe intent
pub const ACTION_UNSUBSCRIBE: u8 = 0x00;

/// Size of the segment-count prefix of a message
pub const SEGMENT_COUNT_SIZE: usize = 2;

/// Size of the length prefix of each segment
pub const SEGMENT_LEN_SIZE: usize = 4;

/// Default maximum number of segments per message
pub const DEFAULT_MAX_SEGMENTS: usize = 16;

/// Default maximum size of a single segment (16 MiB)
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

/// Default port producers connect to
pub const DEFAULT_INGRESS_PORT: u16 = 5555;

/// Default port consumers connect to
pub const DEFAULT_EGRESS_PORT: u16 = 5556;
