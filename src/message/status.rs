// ABOUTME: Defines the fixed set of SRFC response status codes
// ABOUTME: Carried on the wire as the decimal value of the STATUS header field

use num_enum::TryFromPrimitive;

/// SRFC response status codes.
///
/// The 2xx and 4xx codes are conveyed unchanged from handlers; the 5xx codes
/// are produced by the runtime itself:
///
/// - `UnknownMethod` when a request names a method the peer has not
///   registered,
/// - `UnhandledException` when a handler panics,
/// - `ConnectionError` when a request cannot be sent or the connection goes
///   down before the response arrives,
/// - `ResponseTimeout` when a configured response timeout elapses.
#[derive(TryFromPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusCode {
    /// Uninitialized status, never set by the runtime on a sent frame.
    None = 0,

    // Success codes
    Ok = 200,
    NonAuthoritativeInformation = 203,
    NoContent = 204,

    // Request errors
    BadRequest = 400,
    Unauthorized = 401,
    NotImplemented = 402,
    Forbidden = 403,
    UnknownMethod = 404,
    Conflict = 405,

    // Method execution errors
    ExecutionError = 500,
    UnhandledException = 501,
    InvalidArguments = 502,
    ConnectionError = 503,
    ResponseTimeout = 504,
}

impl StatusCode {
    /// Whether this code signals a successful exchange.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StatusCode::Ok | StatusCode::NonAuthoritativeInformation | StatusCode::NoContent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_known_codes() {
        assert_eq!(StatusCode::try_from(200u32).unwrap(), StatusCode::Ok);
        assert_eq!(
            StatusCode::try_from(404u32).unwrap(),
            StatusCode::UnknownMethod
        );
        assert_eq!(
            StatusCode::try_from(503u32).unwrap(),
            StatusCode::ConnectionError
        );
    }

    #[test]
    fn try_from_unknown_code() {
        assert!(StatusCode::try_from(201u32).is_err());
        assert!(StatusCode::try_from(505u32).is_err());
    }

    #[test]
    fn success_classification() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::NoContent.is_success());
        assert!(!StatusCode::UnknownMethod.is_success());
        assert!(!StatusCode::ConnectionError.is_success());
    }
}
