// ABOUTME: Encode side of the SRFCv1 wire format
// ABOUTME: Length-preamble + null-terminated ASCII header fields + raw payload

use crate::message::{Request, Response};
use bytes::{BufMut, Bytes, BytesMut};

/// Length of the frame preamble: 32 ASCII decimal digits, left-zero-padded,
/// giving the total frame length in bytes (header + payload).
pub const PREAMBLE_LEN: usize = 32;

/// Protocol tag, the first header field of every frame.
pub const PROTOCOL_TAG: &str = "SRFCv1";

/// Separator between a header field's key and value.
pub const KEY_VALUE_SEPARATOR: &str = ": ";

/// Every header field ends with a single NUL byte.
pub const FIELD_TERMINATOR: u8 = 0;

/// Types that serialize to a complete SRFC frame.
///
/// `encode_header` writes the null-terminated fields that follow the
/// preamble; `to_frame_bytes` prepends the preamble computed from the header
/// and payload sizes and appends the payload, so the declared length is
/// always exact even though it appears first on the wire.
pub trait Encodable {
    /// Write the header fields (everything between preamble and payload).
    fn encode_header(&self, buf: &mut BytesMut);

    /// The frame payload, possibly empty.
    fn frame_payload(&self) -> &Bytes;

    /// Serialize to a single contiguous frame.
    fn to_frame_bytes(&self) -> Bytes {
        let mut header = BytesMut::with_capacity(128);
        self.encode_header(&mut header);

        let payload = self.frame_payload();
        let total = PREAMBLE_LEN + header.len() + payload.len();

        let mut frame = BytesMut::with_capacity(total);
        frame.put_slice(format!("{total:032}").as_bytes());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(payload);
        frame.freeze()
    }
}

/// Write a bare null-terminated field.
fn put_field(buf: &mut BytesMut, text: &str) {
    buf.put_slice(text.as_bytes());
    buf.put_u8(FIELD_TERMINATOR);
}

/// Write a null-terminated `KEY: VALUE` field.
fn put_key_value(buf: &mut BytesMut, key: &str, value: &str) {
    buf.put_slice(key.as_bytes());
    buf.put_slice(KEY_VALUE_SEPARATOR.as_bytes());
    buf.put_slice(value.as_bytes());
    buf.put_u8(FIELD_TERMINATOR);
}

impl Encodable for Request {
    fn encode_header(&self, buf: &mut BytesMut) {
        put_field(buf, PROTOCOL_TAG);
        put_key_value(buf, "TYPE", "REQ");
        put_key_value(buf, "RI", &self.id().to_string());
        put_key_value(buf, "PS", &self.payload().len().to_string());
        put_field(buf, self.method());
        for (name, value) in self.params() {
            put_key_value(buf, name, value);
        }
    }

    fn frame_payload(&self) -> &Bytes {
        self.payload()
    }
}

impl Encodable for Response {
    fn encode_header(&self, buf: &mut BytesMut) {
        put_field(buf, PROTOCOL_TAG);
        put_key_value(buf, "TYPE", "RES");
        put_key_value(buf, "RI", &self.id().to_string());
        put_key_value(buf, "PS", &self.payload().len().to_string());
        put_key_value(buf, "STATUS", &(self.status() as u32).to_string());
    }

    fn frame_payload(&self) -> &Bytes {
        self.payload()
    }
}
