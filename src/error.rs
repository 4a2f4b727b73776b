//! Error taxonomy for the runtime.
//!
//! Every fallible entry point returns [`RtError`]. The variants map 1:1 onto
//! the stable integer codes a C binding would expose; see [`RtError::code`].

use crate::transport::Pe;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RtError>;

/// The error kinds a runtime call can produce.
#[derive(Debug, Error)]
pub enum RtError {
    /// Malformed argument: bad PE id, zero stride, unknown option bit,
    /// invalid comparison code, and similar caller mistakes.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// An address that must lie in the symmetric heap does not.
    #[error("address {addr:#x} is not in the symmetric heap")]
    NotSymmetric { addr: usize },

    /// Target PE or remote address not reachable by the transport.
    #[error("PE {0} is not reachable")]
    Unreachable(Pe),

    /// Symmetric heap exhausted. Collective: every PE observes it.
    #[error("symmetric heap exhausted")]
    OutOfMemory,

    /// Bad team handle, destroyed team, or a collective on a team the
    /// caller does not belong to.
    #[error("team error: {0}")]
    Team(String),

    /// Call sequence violates the init/finalize lifecycle.
    #[error("lifecycle violation: {0}")]
    State(&'static str),

    /// Fatal transport failure. Unrecoverable.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RtError {
    /// Stable non-zero integer code for this error kind.
    ///
    /// `0` is reserved for success in integer-returning bindings.
    pub fn code(&self) -> i32 {
        match self {
            RtError::Invalid(_) => 1,
            RtError::NotSymmetric { .. } => 2,
            RtError::Unreachable(_) => 3,
            RtError::OutOfMemory => 4,
            RtError::Team(_) => 5,
            RtError::State(_) => 6,
            RtError::Transport(_) => 7,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        RtError::Invalid(msg.into())
    }
}
