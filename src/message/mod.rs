//! SRFC message data model: requests, responses, and status codes.

pub mod request;
pub mod response;
pub mod status;

pub use request::{Request, next_request_id};
pub use response::Response;
pub use status::StatusCode;
