//! Provides a type representing a parsed SRFC wire frame as well as the
//! validate/parse routines the reader gates dispatch on.

use crate::codec::{KEY_VALUE_SEPARATOR, PREAMBLE_LEN, PROTOCOL_TAG};
use crate::message::{Request, Response, StatusCode};
use bytes::Bytes;
use thiserror::Error;

/// One self-contained wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Request(Request),
    Response(Response),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough data is available to hold a complete frame.
    #[error("not enough data for a complete frame")]
    Incomplete,

    /// The frame is structurally invalid.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

impl Frame {
    /// Checks whether `src` starts with a complete frame. On success, returns
    /// the frame's total length so the reader can split it off. Returns
    /// `Incomplete` while more bytes are needed and `Malformed` when the
    /// preamble cannot be trusted (the reader then discards its buffer to
    /// resynchronize).
    pub fn check(src: &[u8]) -> Result<usize, FrameError> {
        if src.len() < PREAMBLE_LEN {
            return Err(FrameError::Incomplete);
        }
        let total = parse_preamble(src)?;
        if total < PREAMBLE_LEN {
            return Err(FrameError::Malformed("declared length shorter than preamble"));
        }
        if src.len() < total {
            return Err(FrameError::Incomplete);
        }
        Ok(total)
    }

    /// Full structural validation of a single frame occupying all of `src`.
    ///
    /// True exactly when `parse` would succeed. Total: never panics, any
    /// defect yields `false`. Mirrors `parse` field for field but allocates
    /// nothing.
    pub fn validate(src: &[u8]) -> bool {
        validate_frame(src).is_ok()
    }

    /// Parse a single frame occupying all of `src`.
    ///
    /// The reader calls this only after `validate` has succeeded, but the
    /// function stands alone: any out-of-bounds cursor advancement or grammar
    /// violation fails with `Malformed`.
    pub fn parse(src: &[u8]) -> Result<Frame, FrameError> {
        let mut fields = preamble_and_envelope(src)?;
        let envelope = fields.envelope;

        if envelope.is_request {
            let method = fields.take_field()?.to_string();
            let mut params = Vec::new();
            while fields.has_remaining() {
                let (name, value) = split_key_value(fields.take_field()?)?;
                params.push((name.to_string(), value.to_string()));
            }
            let payload = Bytes::copy_from_slice(&src[fields.end..]);
            Ok(Frame::Request(Request::from_parts(
                envelope.id,
                method,
                params,
                payload,
            )))
        } else {
            let status = parse_status(&mut fields)?;
            let payload = Bytes::copy_from_slice(&src[fields.end..]);
            Ok(Frame::Response(Response::from_parts(
                envelope.id,
                status,
                payload,
            )))
        }
    }
}

/// The fields common to both frame types, read before the type split.
#[derive(Clone, Copy)]
struct Envelope {
    is_request: bool,
    id: u64,
}

/// Cursor over the null-terminated header fields of one frame.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Exclusive bound for field scanning; once the payload size is known
    /// this is the payload start, so no field can leak into the payload.
    end: usize,
    envelope: Envelope,
}

impl<'a> Fields<'a> {
    fn has_remaining(&self) -> bool {
        self.pos < self.end
    }

    /// Take the next field: the bytes up to (not including) the next NUL
    /// within bounds. The terminator must be present.
    fn take_field(&mut self) -> Result<&'a str, FrameError> {
        let region = &self.buf[self.pos..self.end];
        let nul = region
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::Malformed("unterminated header field"))?;
        let text = std::str::from_utf8(&region[..nul])
            .map_err(|_| FrameError::Malformed("header field is not valid text"))?;
        self.pos += nul + 1;
        Ok(text)
    }

    /// Take a field and require a specific key.
    fn take_keyed(&mut self, key: &'static str) -> Result<&'a str, FrameError> {
        let (name, value) = split_key_value(self.take_field()?)?;
        if name != key {
            return Err(FrameError::Malformed("unexpected header field"));
        }
        Ok(value)
    }
}

fn split_key_value(field: &str) -> Result<(&str, &str), FrameError> {
    field
        .split_once(KEY_VALUE_SEPARATOR)
        .ok_or(FrameError::Malformed("missing key/value separator"))
}

fn parse_decimal(text: &str) -> Result<u64, FrameError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::Malformed("numeric field is not decimal"));
    }
    text.parse()
        .map_err(|_| FrameError::Malformed("numeric field out of range"))
}

/// Parse the 32-digit length preamble at the start of `src`.
fn parse_preamble(src: &[u8]) -> Result<usize, FrameError> {
    if src.len() < PREAMBLE_LEN {
        return Err(FrameError::Incomplete);
    }
    let digits = &src[..PREAMBLE_LEN];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::Malformed("preamble is not decimal"));
    }
    let text = std::str::from_utf8(digits)
        .map_err(|_| FrameError::Malformed("preamble is not decimal"))?;
    let value: u64 = text
        .parse()
        .map_err(|_| FrameError::Malformed("preamble out of range"))?;
    usize::try_from(value).map_err(|_| FrameError::Malformed("preamble out of range"))
}

/// Walk the preamble and the four leading header fields (tag, TYPE, RI, PS)
/// and bound the cursor at the payload start.
fn preamble_and_envelope(src: &[u8]) -> Result<Fields<'_>, FrameError> {
    let total = parse_preamble(src)?;
    if total != src.len() {
        return Err(FrameError::Malformed("preamble disagrees with frame length"));
    }

    let mut fields = Fields {
        buf: src,
        pos: PREAMBLE_LEN,
        end: src.len(),
        envelope: Envelope {
            is_request: false,
            id: 0,
        },
    };

    if fields.take_field()? != PROTOCOL_TAG {
        return Err(FrameError::Malformed("unknown protocol tag"));
    }

    let is_request = match fields.take_keyed("TYPE")? {
        "REQ" => true,
        "RES" => false,
        _ => return Err(FrameError::Malformed("unknown frame type")),
    };

    let id = parse_decimal(fields.take_keyed("RI")?)?;

    let payload_size = parse_decimal(fields.take_keyed("PS")?)?;
    let payload_size =
        usize::try_from(payload_size).map_err(|_| FrameError::Malformed("payload size out of range"))?;
    let payload_start = src
        .len()
        .checked_sub(payload_size)
        .filter(|&start| start >= fields.pos)
        .ok_or(FrameError::Malformed("payload size exceeds frame"))?;

    fields.end = payload_start;
    fields.envelope = Envelope { is_request, id };
    Ok(fields)
}

/// Parse the RES-only STATUS field and require the header to be fully
/// consumed at the payload boundary.
fn parse_status(fields: &mut Fields<'_>) -> Result<StatusCode, FrameError> {
    let raw = parse_decimal(fields.take_keyed("STATUS")?)?;
    let status = u32::try_from(raw)
        .ok()
        .and_then(|raw| StatusCode::try_from(raw).ok())
        .ok_or(FrameError::Malformed("unknown status code"))?;
    if fields.has_remaining() {
        return Err(FrameError::Malformed("trailing data after STATUS"));
    }
    Ok(status)
}

/// The non-allocating twin of `parse`: same walk, values discarded.
fn validate_frame(src: &[u8]) -> Result<(), FrameError> {
    let mut fields = preamble_and_envelope(src)?;
    if fields.envelope.is_request {
        fields.take_field()?; // method token; may be empty
        while fields.has_remaining() {
            split_key_value(fields.take_field()?)?;
        }
    } else {
        parse_status(&mut fields)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encodable;

    /// Hand-build a frame from header fields and a payload, with a correct
    /// or overridden preamble.
    fn build_frame(fields: &[&[u8]], payload: &[u8], preamble: Option<&[u8]>) -> Vec<u8> {
        let header: Vec<u8> = fields
            .iter()
            .flat_map(|f| f.iter().copied().chain(std::iter::once(0u8)))
            .collect();
        let total = PREAMBLE_LEN + header.len() + payload.len();
        let mut frame = match preamble {
            Some(p) => p.to_vec(),
            None => format!("{total:032}").into_bytes(),
        };
        frame.extend_from_slice(&header);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn check_incomplete_then_complete() {
        let frame = Request::new("PING").to_frame_bytes();
        assert_eq!(Frame::check(&frame[..10]), Err(FrameError::Incomplete));
        assert_eq!(
            Frame::check(&frame[..frame.len() - 1]),
            Err(FrameError::Incomplete)
        );
        assert_eq!(Frame::check(&frame), Ok(frame.len()));
    }

    #[test]
    fn check_rejects_garbage_preamble() {
        let mut data = vec![0xFFu8; 16];
        data.extend_from_slice(&Request::new("PING").to_frame_bytes());
        assert!(matches!(
            Frame::check(&data),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn check_rejects_tiny_declared_length() {
        // A declared length below the preamble size would make the reader
        // split off zero-progress slices.
        let frame = build_frame(&[b"SRFCv1"], b"", Some(format!("{:032}", 8).as_bytes()));
        assert!(matches!(Frame::check(&frame), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn parse_request_roundtrip() {
        let mut req = Request::new("PRINT");
        req.add_param("MESSAGE", "hello");
        req.add_param("MESSAGE", "world");
        req.set_payload(Bytes::from_static(b"\x00\x01binary\xFF"));

        let frame = req.to_frame_bytes();
        assert!(Frame::validate(&frame));
        match Frame::parse(&frame).unwrap() {
            Frame::Request(parsed) => assert_eq!(parsed, req),
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn parse_response_roundtrip() {
        let mut resp = Response::with_status(1234, StatusCode::NoContent);
        resp.set_payload(Bytes::from_static(b"result"));

        let frame = resp.to_frame_bytes();
        assert!(Frame::validate(&frame));
        match Frame::parse(&frame).unwrap() {
            Frame::Response(parsed) => assert_eq!(parsed, resp),
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn parse_request_without_params() {
        let req = Request::new("STATUS");
        let frame = req.to_frame_bytes();
        match Frame::parse(&frame).unwrap() {
            Frame::Request(parsed) => {
                assert!(parsed.params().is_empty());
                assert!(parsed.payload().is_empty());
            }
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn parse_preserves_param_order_and_duplicates() {
        let mut req = Request::new("SET");
        req.add_param("K", "1");
        req.add_param("K", "2");
        req.add_param("A", "3");
        let frame = req.to_frame_bytes();
        match Frame::parse(&frame).unwrap() {
            Frame::Request(parsed) => {
                let params: Vec<_> = parsed
                    .params()
                    .iter()
                    .map(|(n, v)| (n.as_str(), v.as_str()))
                    .collect();
                assert_eq!(params, vec![("K", "1"), ("K", "2"), ("A", "3")]);
            }
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn param_value_may_contain_separator() {
        let mut req = Request::new("SET");
        req.add_param("URL", "http://host: 8080/path");
        let frame = req.to_frame_bytes();
        match Frame::parse(&frame).unwrap() {
            Frame::Request(parsed) => {
                assert_eq!(parsed.param("URL"), Some("http://host: 8080/path"));
            }
            other => panic!("unexpected frame variant: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_wrong_tag() {
        let frame = build_frame(
            &[b"SRFCv2", b"TYPE: REQ", b"RI: 1", b"PS: 0", b"PING"],
            b"",
            None,
        );
        assert!(!Frame::validate(&frame));
        assert!(Frame::parse(&frame).is_err());
    }

    #[test]
    fn validate_rejects_unknown_type() {
        let frame = build_frame(
            &[b"SRFCv1", b"TYPE: FOO", b"RI: 1", b"PS: 0", b"PING"],
            b"",
            None,
        );
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_non_decimal_numerics() {
        for bad in [
            &[b"SRFCv1" as &[u8], b"TYPE: REQ", b"RI: x1", b"PS: 0", b"PING"][..],
            &[b"SRFCv1" as &[u8], b"TYPE: REQ", b"RI: -1", b"PS: 0", b"PING"][..],
            &[b"SRFCv1" as &[u8], b"TYPE: REQ", b"RI: 1", b"PS: ten", b"PING"][..],
            &[b"SRFCv1" as &[u8], b"TYPE: RES", b"RI: 1", b"PS: 0", b"STATUS: err"][..],
        ] {
            let frame = build_frame(bad, b"", None);
            assert!(!Frame::validate(&frame), "accepted {bad:?}");
        }
    }

    #[test]
    fn validate_rejects_status_outside_fixed_set() {
        let frame = build_frame(
            &[b"SRFCv1", b"TYPE: RES", b"RI: 1", b"PS: 0", b"STATUS: 299"],
            b"",
            None,
        );
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_preamble_length_mismatch() {
        let mut frame = Request::new("PING").to_frame_bytes().to_vec();
        // claim one byte more than the frame holds
        let total = frame.len() + 1;
        frame[..PREAMBLE_LEN].copy_from_slice(format!("{total:032}").as_bytes());
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_payload_size_exceeding_frame() {
        let frame = build_frame(
            &[b"SRFCv1", b"TYPE: REQ", b"RI: 1", b"PS: 9999", b"PING"],
            b"xy",
            None,
        );
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_param_straddling_payload_boundary() {
        // The last param's terminator lands inside the declared payload, so
        // the header cannot fill the gap exactly.
        let header: &[&[u8]] = &[b"SRFCv1", b"TYPE: REQ", b"RI: 1", b"PS: 3", b"PING"];
        let mut frame = build_frame(header, b"", None);
        // append an unterminated field followed by the 3 payload bytes, and
        // fix up the preamble for the longer frame
        frame.extend_from_slice(b"K: v");
        frame.extend_from_slice(b"pay");
        let total = frame.len();
        frame[..PREAMBLE_LEN].copy_from_slice(format!("{total:032}").as_bytes());
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_response_with_method_like_extra_field() {
        let frame = build_frame(
            &[
                b"SRFCv1",
                b"TYPE: RES",
                b"RI: 1",
                b"PS: 0",
                b"STATUS: 200",
                b"EXTRA: field",
            ],
            b"",
            None,
        );
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_rejects_response_missing_status() {
        let frame = build_frame(&[b"SRFCv1", b"TYPE: RES", b"RI: 1", b"PS: 0"], b"", None);
        assert!(!Frame::validate(&frame));
    }

    #[test]
    fn validate_accepts_empty_method_token() {
        // Lenient by design: dispatch answers unknown_method instead.
        let frame = build_frame(
            &[b"SRFCv1", b"TYPE: REQ", b"RI: 1", b"PS: 0", b""],
            b"",
            None,
        );
        assert!(Frame::validate(&frame));
        assert!(Frame::parse(&frame).is_ok());
    }

    #[test]
    fn validator_agrees_with_parse_on_arbitrary_prefixes() {
        // Every prefix of a valid frame must be rejected consistently.
        let mut req = Request::new("ECHO");
        req.add_param("A", "B");
        req.set_payload(Bytes::from_static(b"123456"));
        let frame = req.to_frame_bytes();
        for cut in 0..frame.len() {
            let slice = &frame[..cut];
            assert_eq!(
                Frame::validate(slice),
                Frame::parse(slice).is_ok(),
                "divergence at prefix length {cut}"
            );
        }
        assert!(Frame::validate(&frame));
    }
}
