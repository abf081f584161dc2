//! Error handling for finsky.
//!
//! Every fallible operation in this crate surfaces one of four error
//! categories:
//!
//! * [`Error::Transport`] - connection or I/O failure below the HTTP layer
//! * [`Error::Protocol`] - the service answered with a non-200 status; the
//!   response body text is carried verbatim as the error detail
//! * [`Error::Decode`] - the response bytes could not be parsed into the
//!   expected structured form
//! * [`Error::Authentication`] - login succeeded at the transport level but
//!   the response did not contain an auth token
//!
//! None of these are retried internally; callers see each failure as-is and
//! must not assume session state was mutated on a failure path.

use thiserror::Error;

/// Unified error type for all finsky operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection or I/O failure below the HTTP layer (DNS, socket, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service rejected the request with a non-200 status.
    ///
    /// Carries the response body text verbatim, which is how the service
    /// reports its rejection reason.
    #[error("service rejected request: {0}")]
    Protocol(String),

    /// The response body could not be decoded into the expected form.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The login response did not contain an auth token.
    #[error("authentication failed")]
    Authentication,
}

/// Standard result type for finsky operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts protobuf parse and serialization errors to [`Error::Decode`].
impl From<protobuf::Error> for Error {
    fn from(e: protobuf::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Converts URL parsing errors to [`Error::Decode`].
///
/// The only URLs parsed at runtime come out of service responses (download
/// URLs), so a parse failure means the response was malformed.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::Decode(e.to_string())
    }
}
