//! Server errors.
//!
//! Every variant is connection-scoped: the offending connection is torn down
//! and no other connection is affected. The only process-fatal failure is a
//! listener bind error at startup, which is reported through [`AnyResult`]
//! instead.
//!
//! [`AnyResult`]: crate::AnyResult

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed request or response framing. No response is sent.
    #[error("malformed message: {0}")]
    Decode(String),

    /// The request target resolves outside the configured server root.
    #[error("invalid script path: {0}")]
    Path(String),

    /// The gateway script could not be spawned, or its output is not a
    /// well-formed HTTP response.
    #[error("gateway failure: {0}")]
    Gateway(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
