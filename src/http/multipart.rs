//! `multipart/x-mixed-replace` part encoding
//!
//! Each frame becomes one part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 1234\r\n
//! \r\n
//! <1234 bytes>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Part boundary token
pub const BOUNDARY: &str = "frame";

/// Response content type announcing the boundary
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Encode one part carrying `body`
pub fn encode_part(content_type: &str, body: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        content_type,
        body.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + body.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(body);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_part() {
        let part = encode_part("image/jpeg", b"\xff\xd8abc");

        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n\xff\xd8abc\r\n"
        );
    }

    #[test]
    fn test_content_type_names_boundary() {
        assert!(STREAM_CONTENT_TYPE.ends_with(&format!("boundary={}", BOUNDARY)));
    }

    #[test]
    fn test_empty_body() {
        let part = encode_part("image/jpeg", b"");
        assert!(part.ends_with(b"Content-Length: 0\r\n\r\n\r\n"));
    }
}
