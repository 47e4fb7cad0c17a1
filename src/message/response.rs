//! Response message type.

use crate::message::StatusCode;
use bytes::Bytes;

/// An SRFC response, answering the request whose id it carries.
///
/// Built either by the dispatch pipeline (seeded from the request id) or by
/// parsing a received frame. Unlike a request's id, the id here stays
/// mutable until the frame is sent, so a handler can retarget a prepared
/// response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    id: u64,
    status: StatusCode,
    payload: Bytes,
}

impl Response {
    /// Create an `Ok` response for the given request id.
    pub fn new(id: u64) -> Response {
        Response::with_status(id, StatusCode::Ok)
    }

    pub fn with_status(id: u64, status: StatusCode) -> Response {
        Response {
            id,
            status,
            payload: Bytes::new(),
        }
    }

    pub(crate) fn from_parts(id: u64, status: StatusCode, payload: Bytes) -> Response {
        Response {
            id,
            status,
            payload,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_to_ok_and_empty_payload() {
        let resp = Response::new(7);
        assert_eq!(resp.id(), 7);
        assert_eq!(resp.status(), StatusCode::Ok);
        assert!(resp.payload().is_empty());
    }

    #[test]
    fn id_is_mutable_until_sent() {
        let mut resp = Response::with_status(1, StatusCode::NoContent);
        resp.set_id(42);
        assert_eq!(resp.id(), 42);
        assert_eq!(resp.status(), StatusCode::NoContent);
    }
}
