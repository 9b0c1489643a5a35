//! Length-delimited multi-segment codec
//!
//! Used with `tokio_util::codec::Framed` on both ends of every bus
//! connection. A message is only yielded once all of its segments have
//! arrived, so partial frames never reach the relay loop.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::{
    DEFAULT_MAX_SEGMENTS, DEFAULT_MAX_SEGMENT_SIZE, SEGMENT_COUNT_SIZE, SEGMENT_LEN_SIZE,
};
use super::frame::Frame;
use crate::error::{Error, ProtocolError};

/// Codec for bus messages
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_segments: usize,
    max_segment_size: usize,
}

impl FrameCodec {
    /// Codec with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SEGMENTS, DEFAULT_MAX_SEGMENT_SIZE)
    }

    /// Codec with custom limits
    ///
    /// `max_segments` is capped to what the u16 count prefix can carry.
    pub fn with_limits(max_segments: usize, max_segment_size: usize) -> Self {
        Self {
            max_segments: max_segments.min(u16::MAX as usize),
            max_segment_size: max_segment_size.min(u32::MAX as usize),
        }
    }

    /// Maximum segments per message
    pub fn max_segments(&self) -> usize {
        self.max_segments
    }

    /// Maximum size of one segment
    pub fn max_segment_size(&self) -> usize {
        self.max_segment_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < SEGMENT_COUNT_SIZE {
            return Ok(None);
        }

        let count = u16::from_be_bytes([src[0], src[1]]) as usize;
        if count > self.max_segments {
            return Err(ProtocolError::TooManySegments {
                count,
                max: self.max_segments,
            }
            .into());
        }

        // Walk the length prefixes without consuming anything until the
        // whole message is buffered.
        let mut offset = SEGMENT_COUNT_SIZE;
        for _ in 0..count {
            let header_end = offset + SEGMENT_LEN_SIZE;
            if src.len() < header_end {
                src.reserve(header_end - src.len());
                return Ok(None);
            }

            let len = u32::from_be_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]) as usize;
            if len > self.max_segment_size {
                return Err(ProtocolError::SegmentTooLarge {
                    len,
                    max: self.max_segment_size,
                }
                .into());
            }

            offset = header_end + len;
            if src.len() < offset {
                src.reserve(offset - src.len());
                return Ok(None);
            }
        }

        let mut message = src.split_to(offset).freeze();
        message.advance(SEGMENT_COUNT_SIZE);

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let len = message.get_u32() as usize;
            segments.push(message.split_to(len));
        }

        Ok(Some(Frame::from_segments(segments)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        if frame.len() > self.max_segments {
            return Err(ProtocolError::TooManySegments {
                count: frame.len(),
                max: self.max_segments,
            }
            .into());
        }
        if let Some(large) = frame
            .segments()
            .iter()
            .find(|s| s.len() > self.max_segment_size)
        {
            return Err(ProtocolError::SegmentTooLarge {
                len: large.len(),
                max: self.max_segment_size,
            }
            .into());
        }

        dst.reserve(frame.encoded_len());
        dst.put_u16(frame.len() as u16);
        for segment in frame.segments() {
            dst.put_u32(segment.len() as u32);
            dst.put_slice(segment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode(Frame::data("x", "m", Bytes::from_static(b"pp")));

        assert_eq!(
            buf.as_ref(),
            &[0, 3, 0, 0, 0, 1, b'x', 0, 0, 0, 1, b'm', 0, 0, 0, 2, b'p', b'p']
        );
    }

    #[test]
    fn test_decode_waits_for_whole_message() {
        let frame = Frame::data("topic", "{\"frame_id\":1}", Bytes::from(vec![9u8; 300]));
        let full = encode(frame.clone());
        let mut codec = FrameCodec::new();

        // Feed one byte at a time: nothing is yielded until the last byte
        let mut src = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            src.put_u8(*byte);
            let decoded = codec.decode(&mut src).unwrap();
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "yielded early at byte {}", i);
            } else {
                assert_eq!(decoded, Some(frame.clone()));
            }
        }
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_messages() {
        let mut src = encode(Frame::data("a", "1", Bytes::from_static(b"first")));
        src.extend_from_slice(&encode(Frame::data("b", "2", Bytes::from_static(b"second"))));
        let mut codec = FrameCodec::new();

        let first = codec.decode(&mut src).unwrap().unwrap();
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first.topic().unwrap().as_ref(), b"a");
        assert_eq!(second.segment(2).unwrap().as_ref(), b"second");
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_zero_segment_message() {
        let mut src = BytesMut::from(&[0u8, 0][..]);
        let frame = FrameCodec::new().decode(&mut src).unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_too_many_segments() {
        let mut src = BytesMut::from(&[0u8, 17][..]);
        let err = FrameCodec::new().decode(&mut src).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::TooManySegments { count: 17, max: 16 })
        ));
    }

    #[test]
    fn test_segment_too_large() {
        let mut codec = FrameCodec::with_limits(4, 8);
        let mut src = BytesMut::from(&[0u8, 1, 0, 0, 0, 9][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(Error::Protocol(ProtocolError::SegmentTooLarge { len: 9, max: 8 }))
        ));

        let mut dst = BytesMut::new();
        let oversized = Frame::from_segments(vec![Bytes::from(vec![0u8; 9])]);
        assert!(codec.encode(oversized, &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
