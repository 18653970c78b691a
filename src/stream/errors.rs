//! Stream dispatcher error types.

use thiserror::Error;

/// Errors raised while routing streamed events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// A streamed content item was missing an expected key or had an
    /// unknown shape. Logged and skipped; never aborts the stream.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// The render surface is gone (client disconnected). Not a failure:
    /// the turn simply stops.
    #[error("render surface closed")]
    Closed,
}

impl DispatchError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DispatchError::MalformedEvent {
            reason: reason.into(),
        }
    }
}

/// Returned by a `RenderSurface` whose consumer has gone away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("render surface closed")]
pub struct SurfaceClosed;

impl From<SurfaceClosed> for DispatchError {
    fn from(_: SurfaceClosed) -> Self {
        DispatchError::Closed
    }
}
